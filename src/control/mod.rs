//! Agent control protocol
//!
//! See [`protocol`] for the handler and message types.

pub mod protocol;

pub use protocol::*;

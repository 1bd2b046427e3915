//! Newtype wrappers for type safety
//!
//! Agents, sessions, conversations, tool calls and permission requests are all
//! identified by strings on the wire. Wrapping them keeps registry keys from
//! being mixed up.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Newtype Wrappers for Type Safety
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "`")]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Configured agent identifier (one subprocess per agent id)
    AgentId
);

string_id!(
    /// Session id assigned by the agent in its `session/new` response
    SessionId
);

string_id!(
    /// Host-side conversation identifier
    ConversationId
);

string_id!(
    /// Tool call id, unique within one session
    ToolCallId
);

string_id!(
    /// Locally generated id correlating a permission prompt with its decision
    RequestId
);

impl RequestId {
    /// Generate a fresh random request id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

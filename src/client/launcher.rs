//! Starting agents
//!
//! The process manager never spawns processes itself. It hands a
//! [`LaunchContext`] to a [`Launcher`], which returns an open connection.

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::transport::SubprocessTransport;

use super::{AgentConnection, LaunchContext};

/// Starts an agent and connects to it
pub trait Launcher: Send + Sync {
    /// Start the agent described by `ctx`
    ///
    /// The returned connection has not performed the handshake yet.
    fn launch(&self, ctx: LaunchContext) -> BoxFuture<'static, Result<AgentConnection>>;
}

/// Launches agents as child processes speaking over stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct SubprocessLauncher;

impl Launcher for SubprocessLauncher {
    fn launch(&self, ctx: LaunchContext) -> BoxFuture<'static, Result<AgentConnection>> {
        async move {
            let transport = SubprocessTransport::new(ctx.spec.clone(), ctx.agent_id.as_str())
                .with_max_frame_size(ctx.max_frame_size)
                .with_close_grace(ctx.close_grace);
            AgentConnection::open(transport, ctx).await
        }
        .boxed()
    }
}

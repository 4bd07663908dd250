//! Tool-call dispatch from a completed stream to the board channel
//!
//! Once a stream finishes, every reconstructed invocation is forwarded to
//! the channel in index order, synchronously, before the orchestrator moves
//! on to synthesis. Argument semantics are not validated here; the board is
//! responsible for rejecting shapes it cannot render.

use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::{ChannelSender, CommandEnvelope};
use crate::stream::PendingStream;

/// A structured command the model asked the client to perform
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    /// Tool name, e.g. `drawCircle`
    pub name: String,

    /// Parsed arguments object
    pub arguments: Value,
}

/// Forwards reconstructed tool invocations to the board channel
pub struct ToolDispatcher {
    channel: ChannelSender,
}

impl ToolDispatcher {
    /// Create a dispatcher forwarding to the given channel
    pub fn new(channel: ChannelSender) -> Self {
        Self { channel }
    }

    /// Finish a stream and forward its invocations in index order
    ///
    /// Returns the accumulated display text and the invocations that were
    /// forwarded.
    pub fn dispatch_stream(&self, pending: PendingStream) -> (String, Vec<ToolInvocation>) {
        let (text, invocations) = pending.finish();
        for invocation in &invocations {
            self.forward(invocation);
        }
        (text, invocations)
    }

    /// Forward a single invocation as `{cmd, args}`
    fn forward(&self, invocation: &ToolInvocation) {
        let envelope = CommandEnvelope::new(&invocation.name, invocation.arguments.clone());
        match self.channel.send(envelope) {
            Ok(()) => debug!("Dispatched tool invocation '{}'", invocation.name),
            Err(e) => warn!(
                "Could not dispatch tool invocation '{}': {}",
                invocation.name, e
            ),
        }
    }
}

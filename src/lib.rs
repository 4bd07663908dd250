//! Chalktalk - a voice tutor that talks and draws on a shared board
//!
//! This crate provides the orchestration layer for a spoken, turn-based
//! conversation with a language model: a turn-taking state machine, a
//! resilient command channel to the board process, and a dispatcher that
//! extracts model-issued drawing commands from the response stream.

pub mod board;
pub mod capability;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod prompts;
pub mod state;
pub mod stream;
pub mod testkit;

// Re-export error types
pub use error::{ChalkError, Result};

// Re-export the core surface
pub use capability::{
    CaptureEngine, CompletionEngine, CompletionRequest, SynthesisEngine, TurnEvent,
};
pub use channel::{BoardChannel, ChannelEvent, ChannelState, ChannelWorker, CommandEnvelope};
pub use config::{BoardConfig, ChannelConfig, OrchestratorConfig};
pub use dispatch::{ToolDispatcher, ToolInvocation};
pub use history::{ConversationHistory, ConversationTurn, TurnRole};
pub use orchestrator::{Engines, Orchestrator, OrchestratorHandle, SessionCommand, SessionEvent};
pub use state::{ConversationPhase, SessionSnapshot, SessionState, SharedSessionState};
pub use stream::{PendingStream, StreamFragment, ToolCallDelta};

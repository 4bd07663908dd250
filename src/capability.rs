//! Capability seams for the external speech and model engines
//!
//! Capture, synthesis, and the model transport are collaborators, not part
//! of this crate. Each is driven through a small trait and reports back by
//! delivering [`TurnEvent`]s into the orchestrator's queue. Every event
//! carries the session epoch it was issued under; events from a superseded
//! epoch are ignored by the orchestrator.

use crossbeam_channel::Sender;
use serde_json::Value;

use crate::history::ConversationTurn;
use crate::stream::StreamFragment;
use crate::Result;

/// Events delivered to the orchestrator queue by the capability engines
#[derive(Clone, Debug)]
pub enum TurnEvent {
    /// Capture produced a final transcript
    TranscriptFinal { text: String, epoch: u64 },

    /// Capture failed (engine missing or mid-utterance error)
    CaptureFailed { error: String, epoch: u64 },

    /// Capture ended without a transcript
    CaptureEnded { epoch: u64 },

    /// One incremental unit of the streamed model response
    StreamFragment { fragment: StreamFragment, epoch: u64 },

    /// The model response stream completed
    StreamCompleted { epoch: u64 },

    /// The model request or stream failed
    StreamFailed { error: String, epoch: u64 },

    /// Synthesis playback started
    SynthesisStarted { epoch: u64 },

    /// Synthesis playback finished
    SynthesisFinished { epoch: u64 },

    /// Synthesis failed or was interrupted
    SynthesisFailed { error: String, epoch: u64 },
}

impl TurnEvent {
    /// The session epoch this event was issued under
    pub fn epoch(&self) -> u64 {
        match self {
            TurnEvent::TranscriptFinal { epoch, .. }
            | TurnEvent::CaptureFailed { epoch, .. }
            | TurnEvent::CaptureEnded { epoch }
            | TurnEvent::StreamFragment { epoch, .. }
            | TurnEvent::StreamCompleted { epoch }
            | TurnEvent::StreamFailed { epoch, .. }
            | TurnEvent::SynthesisStarted { epoch }
            | TurnEvent::SynthesisFinished { epoch }
            | TurnEvent::SynthesisFailed { epoch, .. } => *epoch,
        }
    }
}

/// Sender half of the orchestrator's turn-event queue
pub type TurnEventSender = Sender<TurnEvent>;

/// Everything a streaming completion request carries
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    /// Snapshot of the conversation history at issue time
    pub history: Vec<ConversationTurn>,

    /// Fixed tool schema
    pub tools: Value,

    /// System preamble
    pub system_preamble: String,
}

/// One-shot speech capture
///
/// `start` arms the engine for a single utterance; it must deliver exactly
/// one of `TranscriptFinal`, `CaptureFailed`, or `CaptureEnded` for the
/// given epoch, then disarm. Restarted by the orchestrator per turn.
pub trait CaptureEngine: Send {
    /// Arm capture and return immediately
    fn start(&mut self, sink: TurnEventSender, epoch: u64) -> Result<()>;

    /// Cancel an in-flight capture; a no-op when not capturing
    fn stop(&mut self);
}

/// Text-to-speech playback
///
/// `speak` must deliver `SynthesisStarted` followed by exactly one of
/// `SynthesisFinished` or `SynthesisFailed` for the given epoch.
pub trait SynthesisEngine: Send {
    /// Begin rendering text as audio and return immediately
    fn speak(&mut self, text: &str, sink: TurnEventSender, epoch: u64) -> Result<()>;

    /// Cancel in-flight playback; a no-op when idle
    fn cancel(&mut self);
}

/// Streaming model transport
///
/// `stream` must deliver an ordered sequence of `StreamFragment` events
/// followed by exactly one of `StreamCompleted` or `StreamFailed` for the
/// given epoch.
pub trait CompletionEngine: Send {
    /// Submit a prompt and return immediately
    fn stream(&mut self, request: CompletionRequest, sink: TurnEventSender, epoch: u64)
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_accessor_covers_all_variants() {
        let events = [
            TurnEvent::TranscriptFinal {
                text: "hi".into(),
                epoch: 7,
            },
            TurnEvent::CaptureFailed {
                error: "x".into(),
                epoch: 7,
            },
            TurnEvent::CaptureEnded { epoch: 7 },
            TurnEvent::StreamFragment {
                fragment: StreamFragment::text("a"),
                epoch: 7,
            },
            TurnEvent::StreamCompleted { epoch: 7 },
            TurnEvent::StreamFailed {
                error: "x".into(),
                epoch: 7,
            },
            TurnEvent::SynthesisStarted { epoch: 7 },
            TurnEvent::SynthesisFinished { epoch: 7 },
            TurnEvent::SynthesisFailed {
                error: "x".into(),
                epoch: 7,
            },
        ];
        for event in events {
            assert_eq!(event.epoch(), 7);
        }
    }
}

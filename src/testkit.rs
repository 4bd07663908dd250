//! Scripted capability engines and channel probes
//!
//! The real capture, synthesis, and model engines live outside this crate.
//! The scripted stand-ins here deliver predetermined events on their own
//! threads so the orchestrator can be exercised end to end, and the channel
//! stub exposes the worker side of a [`BoardChannel`] so tests can observe
//! outbound commands and inject connectivity events.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::capability::{
    CaptureEngine, CompletionEngine, CompletionRequest, SynthesisEngine, TurnEvent,
    TurnEventSender,
};
use crate::channel::{
    BoardChannel, ChannelCommand, ChannelEvent, ChannelState, CommandEnvelope,
};
use crate::stream::StreamFragment;
use crate::{ChalkError, Result};

/// Shared record of engine calls, for assertions after the engine moves
/// into the orchestrator
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// All entries so far
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Number of entries starting with a prefix
    pub fn count(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

/// Worker side of a stubbed board channel
pub struct ChannelProbe {
    /// Commands the orchestrator and dispatcher queued
    pub command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    /// Inject channel events toward the orchestrator
    pub event_tx: crossbeam_channel::Sender<ChannelEvent>,
    /// Connectivity state reported by the stub
    pub state: Arc<RwLock<ChannelState>>,
}

impl ChannelProbe {
    /// Drain all queued channel commands
    pub fn drain(&mut self) -> Vec<ChannelCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.command_rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    /// Drain queued commands, keeping only the sent envelopes
    pub fn sent_envelopes(&mut self) -> Vec<CommandEnvelope> {
        self.drain()
            .into_iter()
            .filter_map(|cmd| match cmd {
                ChannelCommand::Send(envelope) => Some(envelope),
                _ => None,
            })
            .collect()
    }

    /// Report a connectivity change to the orchestrator
    pub fn set_state(&self, state: ChannelState) {
        *self.state.write() = state;
        let _ = self.event_tx.send(ChannelEvent::StateChanged(state));
    }
}

/// Create a board channel with no worker behind it
///
/// Commands queue into the probe instead of a socket.
pub fn stub_channel(initial: ChannelState) -> (BoardChannel, ChannelProbe) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = unbounded();
    let state = Arc::new(RwLock::new(initial));
    let channel = BoardChannel::from_parts(command_tx, event_rx, Arc::clone(&state));
    let probe = ChannelProbe {
        command_rx,
        event_tx,
        state,
    };
    (channel, probe)
}

const SCRIPT_DELAY: Duration = Duration::from_millis(10);

/// Capture engine that yields scripted transcripts
pub struct ScriptedCapture {
    transcripts: Arc<Mutex<VecDeque<String>>>,
    fail_with: Option<String>,
    log: CallLog,
}

impl ScriptedCapture {
    /// Yield the given transcripts, one per `start`
    ///
    /// Once the script runs dry, `start` arms but never delivers.
    pub fn with_transcripts(transcripts: Vec<String>) -> Self {
        Self {
            transcripts: Arc::new(Mutex::new(transcripts.into())),
            fail_with: None,
            log: CallLog::new(),
        }
    }

    /// Fail every `start` with the given error
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            transcripts: Arc::new(Mutex::new(VecDeque::new())),
            fail_with: Some(error.into()),
            log: CallLog::new(),
        }
    }

    /// Shared call log
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl CaptureEngine for ScriptedCapture {
    fn start(&mut self, sink: TurnEventSender, epoch: u64) -> Result<()> {
        self.log.record("capture.start");
        if let Some(error) = &self.fail_with {
            return Err(ChalkError::CaptureError(error.clone()));
        }
        if let Some(text) = self.transcripts.lock().pop_front() {
            thread::spawn(move || {
                thread::sleep(SCRIPT_DELAY);
                let _ = sink.send(TurnEvent::TranscriptFinal { text, epoch });
            });
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.record("capture.stop");
    }
}

/// How a scripted synthesis run ends
enum SynthesisScript {
    Finish,
    FailMidPlayback(String),
    NeverSignal,
}

/// Synthesis engine with a scripted outcome
pub struct ScriptedSynthesis {
    script: SynthesisScript,
    log: CallLog,
}

impl ScriptedSynthesis {
    /// Play every utterance to completion
    pub fn new() -> Self {
        Self {
            script: SynthesisScript::Finish,
            log: CallLog::new(),
        }
    }

    /// Start playback, then fail mid-way
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            script: SynthesisScript::FailMidPlayback(error.into()),
            log: CallLog::new(),
        }
    }

    /// Start playback and never signal completion or error
    pub fn silent() -> Self {
        Self {
            script: SynthesisScript::NeverSignal,
            log: CallLog::new(),
        }
    }

    /// Shared call log
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Default for ScriptedSynthesis {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisEngine for ScriptedSynthesis {
    fn speak(&mut self, text: &str, sink: TurnEventSender, epoch: u64) -> Result<()> {
        self.log.record(format!("synthesis.speak:{}", text));
        let outcome = match &self.script {
            SynthesisScript::Finish => Some(TurnEvent::SynthesisFinished { epoch }),
            SynthesisScript::FailMidPlayback(error) => Some(TurnEvent::SynthesisFailed {
                error: error.clone(),
                epoch,
            }),
            SynthesisScript::NeverSignal => None,
        };
        thread::spawn(move || {
            let _ = sink.send(TurnEvent::SynthesisStarted { epoch });
            if let Some(outcome) = outcome {
                thread::sleep(SCRIPT_DELAY);
                let _ = sink.send(outcome);
            }
        });
        Ok(())
    }

    fn cancel(&mut self) {
        self.log.record("synthesis.cancel");
    }
}

/// Completion engine that streams scripted fragment sequences
pub struct ScriptedCompletion {
    responses: Arc<Mutex<VecDeque<Vec<StreamFragment>>>>,
    fail_with: Option<(String, Duration)>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    log: CallLog,
}

impl ScriptedCompletion {
    /// Stream the given fragment sequences, one per request
    ///
    /// Once the script runs dry, requests complete with an empty response.
    pub fn with_responses(responses: Vec<Vec<StreamFragment>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            fail_with: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            log: CallLog::new(),
        }
    }

    /// Fail every request after it is issued
    pub fn failing(error: impl Into<String>) -> Self {
        Self::failing_after(error, SCRIPT_DELAY)
    }

    /// Fail every request after the given delay
    pub fn failing_after(error: impl Into<String>, delay: Duration) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fail_with: Some((error.into(), delay)),
            requests: Arc::new(Mutex::new(Vec::new())),
            log: CallLog::new(),
        }
    }

    /// Requests issued so far, for history assertions
    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Shared call log
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl CompletionEngine for ScriptedCompletion {
    fn stream(
        &mut self,
        request: CompletionRequest,
        sink: TurnEventSender,
        epoch: u64,
    ) -> Result<()> {
        self.log.record("completion.stream");
        self.requests.lock().push(request);

        if let Some((error, delay)) = &self.fail_with {
            let error = error.clone();
            let delay = *delay;
            thread::spawn(move || {
                thread::sleep(delay);
                let _ = sink.send(TurnEvent::StreamFailed { error, epoch });
            });
            return Ok(());
        }

        let fragments = self.responses.lock().pop_front().unwrap_or_default();
        thread::spawn(move || {
            for fragment in fragments {
                thread::sleep(SCRIPT_DELAY / 2);
                let _ = sink.send(TurnEvent::StreamFragment { fragment, epoch });
            }
            thread::sleep(SCRIPT_DELAY / 2);
            let _ = sink.send(TurnEvent::StreamCompleted { epoch });
        });
        Ok(())
    }
}

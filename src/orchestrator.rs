//! Turn-taking orchestrator
//!
//! Drives the conversation cycle: arm capture, accept a final transcript,
//! stream the model response while the dispatcher scans it for tool calls,
//! speak the accumulated text, then re-arm capture. All transitions happen
//! on one worker thread looping over discrete events, so no state is ever
//! mutated concurrently.
//!
//! Every asynchronous operation is issued under the session epoch current at
//! issue time; terminal events from a superseded epoch are ignored, which
//! makes cancellation idempotent.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{
    CaptureEngine, CompletionEngine, CompletionRequest, SynthesisEngine, TurnEvent,
    TurnEventSender,
};
use crate::channel::{BoardChannel, ChannelEvent};
use crate::config::OrchestratorConfig;
use crate::dispatch::ToolDispatcher;
use crate::history::ConversationHistory;
use crate::prompts::{tool_schema, SYSTEM_PREAMBLE};
use crate::state::{ConversationPhase, SharedSessionState};
use crate::stream::{PendingStream, StreamFragment};
use crate::{ChalkError, Result};

/// Commands accepted by the orchestrator
#[derive(Clone, Debug)]
pub enum SessionCommand {
    /// Start a conversation session (clears history, arms capture)
    StartSession,
    /// End the session and cancel in-flight work
    EndSession,
    /// Inject text as if it were a final transcript (bypasses capture)
    SubmitText(String),
    /// Disarm capture without ending the session
    StopListening,
    /// Shut down the orchestrator
    Shutdown,
}

/// Events emitted for UI notifications
///
/// State should be queried from [`SharedSessionState`] rather than
/// reconstructed from events.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// State has changed (trigger a repaint)
    StateChanged,
    /// Display-text delta received from the stream
    ResponseDelta(String),
    /// A user-visible error occurred
    Error(String),
    /// Shutdown complete
    Shutdown,
}

/// The external engines the orchestrator drives
pub struct Engines {
    /// One-shot speech capture
    pub capture: Box<dyn CaptureEngine>,
    /// Text-to-speech playback
    pub synthesis: Box<dyn SynthesisEngine>,
    /// Streaming model transport
    pub completion: Box<dyn CompletionEngine>,
}

/// Handle for controlling the orchestrator
pub struct OrchestratorHandle {
    command_tx: Sender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
    state: SharedSessionState,
}

impl OrchestratorHandle {
    /// Send a command to the orchestrator
    pub fn send_command(&self, cmd: SessionCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .map_err(|e| ChalkError::InternalError(format!("Failed to send command: {}", e)))
    }

    /// Start a conversation session
    pub fn start_session(&self) -> Result<()> {
        self.send_command(SessionCommand::StartSession)
    }

    /// End the session
    pub fn end_session(&self) -> Result<()> {
        self.send_command(SessionCommand::EndSession)
    }

    /// Inject text as if it were a final transcript
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_command(SessionCommand::SubmitText(text.into()))
    }

    /// Disarm capture without ending the session
    pub fn stop_listening(&self) -> Result<()> {
        self.send_command(SessionCommand::StopListening)
    }

    /// Request shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.send_command(SessionCommand::Shutdown)
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event (blocking)
    pub fn recv_event(&self) -> Result<SessionEvent> {
        self.event_rx
            .recv()
            .map_err(|e| ChalkError::InternalError(format!("Failed to receive event: {}", e)))
    }

    /// Receive an event, waiting up to the given duration
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Get the shared session state
    pub fn state(&self) -> &SharedSessionState {
        &self.state
    }
}

/// Main orchestrator coordinating capture, completion, dispatch, and synthesis
pub struct Orchestrator {
    config: OrchestratorConfig,
    state: SharedSessionState,

    command_rx: Receiver<SessionCommand>,
    event_tx: Sender<SessionEvent>,

    turn_tx: TurnEventSender,
    turn_rx: Receiver<TurnEvent>,

    engines: Engines,
    channel: BoardChannel,

    history: ConversationHistory,
    pending: Option<PendingStream>,

    // Deadlines guarded by the state they belong to; cleared when superseded
    listen_at: Option<Instant>,
    speak_deadline: Option<Instant>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Takes ownership of the engines and the board channel handle. Returns
    /// the orchestrator and a handle for controlling it; call
    /// [`Orchestrator::start`] to begin processing.
    pub fn new(
        config: OrchestratorConfig,
        engines: Engines,
        channel: BoardChannel,
    ) -> (Self, OrchestratorHandle) {
        let buffer_size = config.channel_buffer_size;

        let state = SharedSessionState::new();
        let (command_tx, command_rx) = bounded(buffer_size);
        let (event_tx, event_rx) = bounded(buffer_size);
        let (turn_tx, turn_rx) = bounded(buffer_size);

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            state: state.clone(),
        };

        let orchestrator = Self {
            config,
            state,
            command_rx,
            event_tx,
            turn_tx,
            turn_rx,
            engines,
            channel,
            history: ConversationHistory::new(),
            pending: None,
            listen_at: None,
            speak_deadline: None,
        };

        (orchestrator, handle)
    }

    /// Start the orchestrator worker thread
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(mut self) {
        info!("Orchestrator starting");

        let command_rx = self.command_rx.clone();
        let turn_rx = self.turn_rx.clone();
        let channel_rx = self.channel.event_receiver().clone();

        loop {
            select! {
                recv(command_rx) -> cmd => {
                    match cmd {
                        Ok(cmd) => {
                            if !self.handle_command(cmd) {
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Command channel disconnected");
                            break;
                        }
                    }
                }
                recv(turn_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_turn_event(event);
                    }
                }
                recv(channel_rx) -> event => {
                    if let Ok(event) = event {
                        self.handle_channel_event(event);
                    }
                }
                default(Duration::from_millis(10)) => {}
            }

            self.service_timers();
        }

        info!("Orchestrator stopped");
    }

    // === Command handling ===

    fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::StartSession => self.on_start_session(),
            SessionCommand::EndSession => self.on_end_session(),
            SessionCommand::SubmitText(text) => self.on_submit_text(text),
            SessionCommand::StopListening => self.on_stop_listening(),
            SessionCommand::Shutdown => {
                info!("Shutdown requested");
                self.cancel_inflight();
                self.state.write().end_session();
                let _ = self.channel.shutdown();
                let _ = self.event_tx.send(SessionEvent::Shutdown);
                return false;
            }
        }
        true
    }

    fn on_start_session(&mut self) {
        self.cancel_inflight();

        let token = Uuid::new_v4().to_string();
        info!("Starting session {}", token);

        let epoch = {
            let mut state = self.state.write();
            state.start_session(&token);
            state.epoch
        };
        self.history.clear();

        if let Err(e) = self.channel.switch_token(&token) {
            warn!("Board channel unavailable: {}", e);
        }

        self.start_capture(epoch);
        self.emit_state_changed();
    }

    fn on_end_session(&mut self) {
        // Safe to call from any state, including twice in a row
        let was_active = self.state.read().session_active;
        if was_active {
            info!(
                "Ending session after {} turns",
                self.state.read().turn_count
            );
        }

        self.cancel_inflight();
        self.state.write().end_session();
        if let Err(e) = self.channel.disconnect() {
            debug!("Board channel already gone: {}", e);
        }
        self.emit_state_changed();
    }

    fn on_submit_text(&mut self, text: String) {
        let snapshot = self.state.snapshot();
        if !snapshot.session_active {
            warn!("Ignoring submitted text: no active session");
            return;
        }
        if snapshot.phase.is_processing() || snapshot.phase.is_speaking() {
            warn!("Ignoring submitted text: a turn is already in flight");
            return;
        }

        self.engines.capture.stop();
        self.listen_at = None;
        self.accept_transcript(text);
    }

    fn on_stop_listening(&mut self) {
        if !self.state.read().phase.is_listening() {
            debug!("Stop listening requested while not listening");
            return;
        }
        self.engines.capture.stop();
        self.listen_at = None;
        self.state.write().phase = ConversationPhase::Idle;
        self.emit_state_changed();
    }

    // === Turn event handling ===

    fn handle_turn_event(&mut self, event: TurnEvent) {
        let current_epoch = self.state.epoch();
        if event.epoch() != current_epoch {
            debug!(
                "Ignoring stale event from epoch {} (current {})",
                event.epoch(),
                current_epoch
            );
            return;
        }

        match event {
            TurnEvent::TranscriptFinal { text, .. } => self.on_transcript(text),
            TurnEvent::CaptureFailed { error, .. } => {
                self.on_unrecoverable(ChalkError::CaptureError(error));
            }
            TurnEvent::CaptureEnded { .. } => self.on_capture_ended(),
            TurnEvent::StreamFragment { fragment, .. } => self.on_stream_fragment(fragment),
            TurnEvent::StreamCompleted { .. } => self.on_stream_completed(),
            TurnEvent::StreamFailed { error, .. } => {
                self.on_unrecoverable(ChalkError::CompletionError(error));
            }
            TurnEvent::SynthesisStarted { .. } => debug!("Synthesis started"),
            TurnEvent::SynthesisFinished { .. } => self.on_synthesis_terminal(None),
            TurnEvent::SynthesisFailed { error, .. } => self.on_synthesis_terminal(Some(error)),
        }
    }

    fn on_transcript(&mut self, text: String) {
        if !self.state.read().phase.is_listening() {
            debug!("Discarding transcript outside the listening phase");
            return;
        }
        self.accept_transcript(text);
    }

    fn accept_transcript(&mut self, text: String) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("Empty transcript, re-arming capture");
            let epoch = self.state.epoch();
            self.start_capture(epoch);
            return;
        }

        info!("Transcript: {}", trimmed);
        let epoch = {
            let mut state = self.state.write();
            state.begin_processing(trimmed);
            state.epoch
        };
        self.history.add_user_turn(trimmed);
        self.pending = Some(PendingStream::new());

        let request = CompletionRequest {
            history: self.history.snapshot(),
            tools: tool_schema(),
            system_preamble: SYSTEM_PREAMBLE.to_string(),
        };
        if let Err(e) = self
            .engines
            .completion
            .stream(request, self.turn_tx.clone(), epoch)
        {
            self.on_unrecoverable(e);
            return;
        }
        self.emit_state_changed();
    }

    fn on_capture_ended(&mut self) {
        // Capture disarmed itself without a transcript; re-arm so the
        // conversation cannot stall waiting on a dead microphone
        let snapshot = self.state.snapshot();
        if snapshot.session_active && snapshot.phase.is_listening() {
            debug!("Capture ended without a transcript, re-arming");
            self.start_capture(snapshot.epoch);
        }
    }

    fn on_stream_fragment(&mut self, fragment: StreamFragment) {
        let Some(pending) = self.pending.as_mut() else {
            debug!("Discarding fragment: no stream in flight");
            return;
        };
        pending.feed(&fragment);

        if let Some(delta) = fragment.text_delta {
            self.state.write().append_response_delta(&delta);
            let _ = self.event_tx.send(SessionEvent::ResponseDelta(delta));
        }
    }

    fn on_stream_completed(&mut self) {
        let Some(pending) = self.pending.take() else {
            debug!("Stream completion without a pending stream");
            return;
        };

        // Tool dispatch finishes before synthesis begins
        let dispatcher = ToolDispatcher::new(self.channel.sender());
        let (text, invocations) = dispatcher.dispatch_stream(pending);
        if !invocations.is_empty() {
            info!("Dispatched {} tool invocation(s)", invocations.len());
        }

        self.history.add_assistant_turn(&text);
        let epoch = {
            let mut state = self.state.write();
            state.begin_speaking();
            state.epoch
        };
        self.emit_state_changed();

        if text.trim().is_empty() {
            debug!("Nothing to speak, re-arming directly");
            self.reactivate_listening();
            return;
        }

        match self
            .engines
            .synthesis
            .speak(&text, self.turn_tx.clone(), epoch)
        {
            Ok(()) => {
                self.speak_deadline =
                    Some(Instant::now() + Duration::from_millis(self.config.speak_fallback_ms));
            }
            Err(e) => {
                // Playback failures are recoverable; the turn still advances
                warn!("Synthesis unavailable: {}", e);
                self.state.write().set_status(e.user_message());
                self.reactivate_listening();
            }
        }
    }

    fn on_synthesis_terminal(&mut self, error: Option<String>) {
        if !self.state.read().phase.is_speaking() {
            // The fallback ceiling already reactivated this turn
            debug!("Late synthesis signal ignored");
            return;
        }

        if let Some(error) = error {
            warn!("Synthesis failed: {}", error);
            let err = ChalkError::SynthesisError(error);
            self.state.write().set_status(err.user_message());
            let _ = self.event_tx.send(SessionEvent::Error(err.user_message()));
        }

        self.speak_deadline = None;
        self.reactivate_listening();
    }

    // === Shared transitions ===

    /// Arm capture for one utterance, cancelling any prior capture first
    fn start_capture(&mut self, epoch: u64) {
        self.engines.capture.stop();
        self.state.write().begin_listening();
        if let Err(e) = self.engines.capture.start(self.turn_tx.clone(), epoch) {
            self.on_unrecoverable(e);
        }
    }

    /// Move the session back toward listening after a spoken turn
    fn reactivate_listening(&mut self) {
        self.speak_deadline = None;
        if self.state.read().session_active {
            self.state.write().begin_listening();
            self.listen_at =
                Some(Instant::now() + Duration::from_millis(self.config.settle_delay_ms));
        } else {
            self.state.write().phase = ConversationPhase::Idle;
        }
        self.emit_state_changed();
    }

    /// An unrecoverable turn error: report it and end the session
    fn on_unrecoverable(&mut self, err: ChalkError) {
        error!("Unrecoverable turn error: {}", err);
        self.cancel_inflight();
        self.state.write().fail_session(err.user_message());
        if let Err(e) = self.channel.disconnect() {
            debug!("Board channel already gone: {}", e);
        }
        let _ = self.event_tx.send(SessionEvent::Error(err.user_message()));
        self.emit_state_changed();
    }

    /// Cancel outstanding operations and clear their timers
    fn cancel_inflight(&mut self) {
        self.engines.capture.stop();
        self.engines.synthesis.cancel();
        self.pending = None;
        self.listen_at = None;
        self.speak_deadline = None;
    }

    // === Channel observation ===

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(channel_state) => {
                debug!("Board channel is now {}", channel_state);
                {
                    let mut state = self.state.write();
                    state.channel_state = channel_state;
                    if channel_state.is_degraded() {
                        state.set_status(
                            ChalkError::ChannelError("degraded".into()).user_message(),
                        );
                    }
                }
                self.emit_state_changed();
            }
            ChannelEvent::Message(value) => {
                debug!("Board message: {}", value);
            }
            ChannelEvent::Shutdown => debug!("Board channel shut down"),
        }
    }

    // === Timers ===

    fn service_timers(&mut self) {
        let now = Instant::now();

        if let Some(at) = self.listen_at {
            if now >= at {
                self.listen_at = None;
                let snapshot = self.state.snapshot();
                if snapshot.session_active && snapshot.phase.is_listening() {
                    self.start_capture(snapshot.epoch);
                }
            }
        }

        if let Some(at) = self.speak_deadline {
            if now >= at {
                self.speak_deadline = None;
                let snapshot = self.state.snapshot();
                if snapshot.session_active && snapshot.phase.is_speaking() {
                    warn!(
                        "No synthesis signal within {}ms, force-reactivating listening",
                        self.config.speak_fallback_ms
                    );
                    self.engines.synthesis.cancel();
                    self.reactivate_listening();
                }
            }
        }
    }

    fn emit_state_changed(&self) {
        let _ = self.event_tx.send(SessionEvent::StateChanged);
    }
}

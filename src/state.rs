//! Unified session state for the Chalktalk orchestrator
//!
//! The state is the single source of truth for the conversation. It is
//! written by the orchestrator in response to events and read by the UI and
//! test layers, either through lock guards or immutable snapshots.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::channel::ChannelState;

/// Phase of the turn-taking cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConversationPhase {
    /// No turn in progress
    #[default]
    Idle,
    /// Capture armed, waiting for a transcript
    Listening,
    /// Awaiting or consuming the streamed model response
    Processing,
    /// Synthesis playback in progress
    Speaking,
}

impl ConversationPhase {
    /// Check if capture is armed
    pub fn is_listening(&self) -> bool {
        matches!(self, ConversationPhase::Listening)
    }

    /// Check if a model response is in flight
    pub fn is_processing(&self) -> bool {
        matches!(self, ConversationPhase::Processing)
    }

    /// Check if synthesis is playing
    pub fn is_speaking(&self) -> bool {
        matches!(self, ConversationPhase::Speaking)
    }

    /// Check if no turn is in progress
    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationPhase::Idle)
    }
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationPhase::Idle => write!(f, "Idle"),
            ConversationPhase::Listening => write!(f, "Listening"),
            ConversationPhase::Processing => write!(f, "Processing"),
            ConversationPhase::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Session state owned by the orchestrator
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// Current phase of the turn cycle
    pub phase: ConversationPhase,

    /// Whether a conversation session is active
    pub session_active: bool,

    /// Token scoping this session's board connection
    pub session_token: Option<String>,

    /// Epoch marker; bumped whenever in-flight operations become stale
    pub epoch: u64,

    /// Completed turns this session
    pub turn_count: u64,

    /// Last final transcript
    pub transcript: Option<String>,

    /// Response text accumulated from the current stream
    pub current_response: String,

    /// Last complete assistant response
    pub last_response: Option<String>,

    /// Board channel connectivity, mirrored for display
    pub channel_state: ChannelState,

    /// Current user-visible status message (if any)
    pub status: Option<String>,
}

impl SessionState {
    /// Create a new default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an immutable snapshot of current state
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            session_active: self.session_active,
            session_token: self.session_token.clone(),
            epoch: self.epoch,
            turn_count: self.turn_count,
            transcript: self.transcript.clone(),
            current_response: self.current_response.clone(),
            last_response: self.last_response.clone(),
            channel_state: self.channel_state,
            status: self.status.clone(),
        }
    }

    /// Set a user-visible status message
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    /// Clear the status message
    pub fn clear_status(&mut self) {
        self.status = None;
    }

    // === State transitions ===

    /// Activate a new session for the given token
    ///
    /// Bumps the epoch so events from any prior session are ignored.
    pub fn start_session(&mut self, token: impl Into<String>) {
        self.epoch += 1;
        self.session_active = true;
        self.session_token = Some(token.into());
        self.turn_count = 0;
        self.transcript = None;
        self.current_response.clear();
        self.last_response = None;
        self.clear_status();
        self.phase = ConversationPhase::Listening;
    }

    /// Deactivate the session and return to idle
    ///
    /// Bumps the epoch so in-flight operations become stale.
    pub fn end_session(&mut self) {
        self.epoch += 1;
        self.session_active = false;
        self.phase = ConversationPhase::Idle;
    }

    /// Capture re-armed
    pub fn begin_listening(&mut self) {
        self.phase = ConversationPhase::Listening;
    }

    /// Transcript accepted; stream request issued
    pub fn begin_processing(&mut self, transcript: impl Into<String>) {
        self.transcript = Some(transcript.into());
        self.current_response.clear();
        self.phase = ConversationPhase::Processing;
    }

    /// Append a display-text delta from the stream
    pub fn append_response_delta(&mut self, delta: &str) {
        self.current_response.push_str(delta);
    }

    /// Stream complete; synthesis starting
    pub fn begin_speaking(&mut self) {
        self.turn_count += 1;
        if !self.current_response.is_empty() {
            self.last_response = Some(self.current_response.clone());
        }
        self.phase = ConversationPhase::Speaking;
    }

    /// Turn failed unrecoverably; session over
    pub fn fail_session(&mut self, status: impl Into<String>) {
        self.set_status(status);
        self.end_session();
    }
}

/// Immutable snapshot of session state
///
/// Used for reads without holding locks.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub phase: ConversationPhase,
    pub session_active: bool,
    pub session_token: Option<String>,
    pub epoch: u64,
    pub turn_count: u64,
    pub transcript: Option<String>,
    pub current_response: String,
    pub last_response: Option<String>,
    pub channel_state: ChannelState,
    pub status: Option<String>,
}

/// Thread-safe shared session state
#[derive(Clone, Default)]
pub struct SharedSessionState {
    inner: Arc<RwLock<SessionState>>,
}

impl SharedSessionState {
    /// Create a new shared state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a read lock on the state
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, SessionState> {
        self.inner.read()
    }

    /// Get a write lock on the state
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, SessionState> {
        self.inner.write()
    }

    /// Get a snapshot of current state (no lock held after return)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().snapshot()
    }

    // === Convenience read methods ===

    /// Check if a session is active
    pub fn is_session_active(&self) -> bool {
        self.inner.read().session_active
    }

    /// Check if capture is armed
    pub fn is_listening(&self) -> bool {
        self.inner.read().phase.is_listening()
    }

    /// Check if a model response is in flight
    pub fn is_processing(&self) -> bool {
        self.inner.read().phase.is_processing()
    }

    /// Check if synthesis is playing
    pub fn is_speaking(&self) -> bool {
        self.inner.read().phase.is_speaking()
    }

    /// Check if no turn is in progress
    pub fn is_idle(&self) -> bool {
        self.inner.read().phase.is_idle()
    }

    /// Current phase
    pub fn phase(&self) -> ConversationPhase {
        self.inner.read().phase
    }

    /// Current epoch marker
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// Current session token
    pub fn session_token(&self) -> Option<String> {
        self.inner.read().session_token.clone()
    }

    /// Completed turns this session
    pub fn turn_count(&self) -> u64 {
        self.inner.read().turn_count
    }

    /// Last final transcript
    pub fn transcript(&self) -> Option<String> {
        self.inner.read().transcript.clone()
    }

    /// Response text accumulated so far
    pub fn current_response(&self) -> String {
        self.inner.read().current_response.clone()
    }

    /// Mirrored board connectivity
    pub fn channel_state(&self) -> ChannelState {
        self.inner.read().channel_state
    }

    /// Current status message
    pub fn status(&self) -> Option<String> {
        self.inner.read().status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_helpers() {
        assert!(ConversationPhase::Idle.is_idle());
        assert!(ConversationPhase::Listening.is_listening());
        assert!(ConversationPhase::Processing.is_processing());
        assert!(ConversationPhase::Speaking.is_speaking());
        assert_eq!(ConversationPhase::Speaking.to_string(), "Speaking");
    }

    #[test]
    fn test_turn_cycle_transitions() {
        let mut state = SessionState::new();
        assert!(state.phase.is_idle());
        assert!(!state.session_active);

        state.start_session("token-1");
        assert!(state.session_active);
        assert!(state.phase.is_listening());
        assert_eq!(state.epoch, 1);

        state.begin_processing("hello");
        assert!(state.phase.is_processing());
        assert_eq!(state.transcript.as_deref(), Some("hello"));

        state.append_response_delta("Hi ");
        state.append_response_delta("there");
        assert_eq!(state.current_response, "Hi there");

        state.begin_speaking();
        assert!(state.phase.is_speaking());
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.last_response.as_deref(), Some("Hi there"));

        state.begin_listening();
        assert!(state.phase.is_listening());

        state.end_session();
        assert!(!state.session_active);
        assert!(state.phase.is_idle());
        assert_eq!(state.epoch, 2);
    }

    #[test]
    fn test_start_session_resets_conversation() {
        let mut state = SessionState::new();
        state.start_session("a");
        state.begin_processing("hi");
        state.append_response_delta("yo");
        state.begin_speaking();

        state.start_session("b");
        assert_eq!(state.turn_count, 0);
        assert!(state.transcript.is_none());
        assert!(state.current_response.is_empty());
        assert!(state.last_response.is_none());
        assert_eq!(state.session_token.as_deref(), Some("b"));
    }

    #[test]
    fn test_end_session_is_idempotent() {
        let mut state = SessionState::new();
        state.start_session("a");
        state.end_session();
        let after_first = (state.session_active, state.phase);
        state.end_session();
        assert_eq!((state.session_active, state.phase), after_first);
    }

    #[test]
    fn test_fail_session_reports_and_idles() {
        let mut state = SessionState::new();
        state.start_session("a");
        state.fail_session("Speech capture failed.");
        assert!(!state.session_active);
        assert!(state.phase.is_idle());
        assert_eq!(state.status.as_deref(), Some("Speech capture failed."));
    }

    #[test]
    fn test_shared_state_snapshot_is_independent() {
        let shared = SharedSessionState::new();
        let snapshot = shared.snapshot();
        assert!(snapshot.phase.is_idle());

        shared.write().start_session("a");

        assert!(snapshot.phase.is_idle());
        assert!(shared.snapshot().phase.is_listening());
    }
}

//! Resilient command channel to the board process
//!
//! Maintains one logical WebSocket connection scoped by a session token.
//! Abnormal closures are retried with bounded exponential backoff; once the
//! retry budget is spent the channel degrades to a local simulation mode in
//! which sends are acknowledged with a delayed echo instead of being
//! transmitted. A token change closes the live connection with a normal
//! closure code before a new one opens, so two connections are never open at
//! once.

use std::borrow::Cow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::{ChalkError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connectivity state of the board channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    /// A connection attempt is in flight
    #[default]
    Connecting,
    /// Connection established, sends are transmitted
    Open,
    /// Waiting out the backoff delay before the next attempt
    ReconnectWait,
    /// Retry budget spent; sends are echoed locally
    Degraded,
    /// Closed normally; no reconnection until the token changes
    Closed,
}

impl ChannelState {
    /// Check if the connection is established
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    /// Check if the channel is running in local simulation mode
    pub fn is_degraded(&self) -> bool {
        matches!(self, ChannelState::Degraded)
    }

    /// Check if the channel was closed normally
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "Connecting"),
            ChannelState::Open => write!(f, "Open"),
            ChannelState::ReconnectWait => write!(f, "ReconnectWait"),
            ChannelState::Degraded => write!(f, "Degraded"),
            ChannelState::Closed => write!(f, "Closed"),
        }
    }
}

/// Outbound command wire shape: `{cmd, args}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command name, e.g. `drawCircle`
    pub cmd: String,
    /// Command arguments as a JSON object
    pub args: Value,
}

impl CommandEnvelope {
    /// Create a new command envelope
    pub fn new(cmd: impl Into<String>, args: Value) -> Self {
        Self {
            cmd: cmd.into(),
            args,
        }
    }
}

/// Commands accepted by the channel worker
#[derive(Debug)]
pub enum ChannelCommand {
    /// Transmit a command (or echo it locally in degraded mode)
    Send(CommandEnvelope),
    /// Close the current connection normally and reconnect for a new token
    SwitchToken(String),
    /// Drop the connection and enter degraded mode
    ForceDegraded,
    /// Close normally; the channel stays closed until the token changes
    Disconnect,
    /// Shut down the worker
    Shutdown,
}

/// Events emitted by the channel worker
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    /// Connectivity state changed
    StateChanged(ChannelState),
    /// Structured payload received from the board (or a simulated echo)
    Message(Value),
    /// Worker has shut down
    Shutdown,
}

/// Cloneable sending half of the channel, used by the tool dispatcher
#[derive(Clone)]
pub struct ChannelSender {
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    state: Arc<RwLock<ChannelState>>,
}

impl ChannelSender {
    /// Queue a command for transmission
    pub fn send(&self, envelope: CommandEnvelope) -> Result<()> {
        self.command_tx
            .send(ChannelCommand::Send(envelope))
            .map_err(|e| ChalkError::InternalError(format!("Channel worker gone: {}", e)))
    }

    /// Current connectivity state
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }
}

/// Handle for the resilient board channel
///
/// Created together with a [`ChannelWorker`]; the worker must be started for
/// the channel to make progress.
pub struct BoardChannel {
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    event_rx: Receiver<ChannelEvent>,
    state: Arc<RwLock<ChannelState>>,
}

impl BoardChannel {
    /// Create a channel for the given session token
    ///
    /// Returns the handle and the worker. Call [`ChannelWorker::start`] to
    /// begin connecting.
    pub fn new(config: ChannelConfig, token: impl Into<String>) -> (Self, ChannelWorker) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = unbounded();
        let state = Arc::new(RwLock::new(ChannelState::Connecting));

        let channel = Self {
            command_tx: command_tx.clone(),
            event_rx,
            state: Arc::clone(&state),
        };

        let worker = ChannelWorker {
            config,
            token: token.into(),
            command_rx,
            event_tx,
            state,
        };

        (channel, worker)
    }

    /// Assemble a channel handle from raw parts
    ///
    /// Used by the test harness to observe outbound commands directly.
    pub(crate) fn from_parts(
        command_tx: mpsc::UnboundedSender<ChannelCommand>,
        event_rx: Receiver<ChannelEvent>,
        state: Arc<RwLock<ChannelState>>,
    ) -> Self {
        Self {
            command_tx,
            event_rx,
            state,
        }
    }

    /// Get a cloneable sending half
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            command_tx: self.command_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Queue a command for transmission
    pub fn send(&self, envelope: CommandEnvelope) -> Result<()> {
        self.sender().send(envelope)
    }

    /// Switch to a new session token, closing the current connection first
    pub fn switch_token(&self, token: impl Into<String>) -> Result<()> {
        self.send_control(ChannelCommand::SwitchToken(token.into()))
    }

    /// Drop the connection and enter degraded mode
    pub fn force_degraded(&self) -> Result<()> {
        self.send_control(ChannelCommand::ForceDegraded)
    }

    /// Close the connection normally
    pub fn disconnect(&self) -> Result<()> {
        self.send_control(ChannelCommand::Disconnect)
    }

    /// Shut down the worker
    pub fn shutdown(&self) -> Result<()> {
        self.send_control(ChannelCommand::Shutdown)
    }

    fn send_control(&self, cmd: ChannelCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .map_err(|e| ChalkError::InternalError(format!("Channel worker gone: {}", e)))
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ChannelEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event, waiting up to the given duration
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ChannelEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Event receiver for use in a select loop
    pub fn event_receiver(&self) -> &Receiver<ChannelEvent> {
        &self.event_rx
    }

    /// Current connectivity state
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }
}

/// Compute the reconnect backoff delay for a retry count
///
/// Delays double from the configured base and never exceed the cap.
pub fn backoff_delay(config: &ChannelConfig, retry: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry.min(16));
    let ms = config
        .backoff_base_ms
        .saturating_mul(factor)
        .min(config.backoff_cap_ms);
    Duration::from_millis(ms)
}

/// Where the worker loop goes next
enum Flow {
    Connect,
    Open(Box<WsStream>),
    Wait,
    Degraded,
    Closed,
    Exit,
}

/// Worker that owns the WebSocket connection lifecycle
///
/// Runs in a dedicated thread with its own tokio runtime, the same shape the
/// rest of the crate uses for long-running engines.
pub struct ChannelWorker {
    config: ChannelConfig,
    token: String,
    command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    event_tx: Sender<ChannelEvent>,
    state: Arc<RwLock<ChannelState>>,
}

impl ChannelWorker {
    /// Start the worker thread
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            let runtime = match Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create channel runtime: {}", e);
                    let _ = self.event_tx.send(ChannelEvent::Shutdown);
                    return;
                }
            };
            runtime.block_on(self.run());
        })
    }

    async fn run(mut self) {
        info!("Board channel worker starting for token {}", self.token);
        let mut retry_count: u32 = 0;
        let mut flow = Flow::Connect;

        loop {
            flow = match flow {
                Flow::Connect => self.connect_once(&mut retry_count).await,
                Flow::Open(ws) => self.run_open(*ws, &mut retry_count).await,
                Flow::Wait => self.run_reconnect_wait(&mut retry_count).await,
                Flow::Degraded => self.run_degraded(&mut retry_count).await,
                Flow::Closed => self.run_closed(&mut retry_count).await,
                Flow::Exit => break,
            };
        }

        self.set_state(ChannelState::Closed);
        let _ = self.event_tx.send(ChannelEvent::Shutdown);
        info!("Board channel worker stopped");
    }

    fn set_state(&self, next: ChannelState) {
        let changed = {
            let mut state = self.state.write();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            debug!("Channel state -> {}", next);
            let _ = self.event_tx.send(ChannelEvent::StateChanged(next));
        }
    }

    /// Record an abnormal closure and pick the next flow state
    fn on_abnormal_closure(&self, retry_count: &mut u32) -> Flow {
        *retry_count += 1;
        if *retry_count >= self.config.max_reconnect_attempts {
            warn!(
                "Retry budget spent after {} abnormal closures, entering degraded mode",
                retry_count
            );
            Flow::Degraded
        } else {
            Flow::Wait
        }
    }

    async fn connect_once(&mut self, retry_count: &mut u32) -> Flow {
        self.set_state(ChannelState::Connecting);
        let url = self.config.url_for_token(&self.token);
        debug!("Connecting to {}", url);

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connect = tokio::time::timeout(timeout, connect_async(url));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok((ws, _))) => {
                            info!("Board channel open for token {}", self.token);
                            *retry_count = 0;
                            self.set_state(ChannelState::Open);
                            Flow::Open(Box::new(ws))
                        }
                        Ok(Err(e)) => {
                            warn!("Connection attempt failed: {}", e);
                            self.on_abnormal_closure(retry_count)
                        }
                        Err(_) => {
                            warn!(
                                "Connection attempt timed out after {}ms",
                                self.config.connect_timeout_ms
                            );
                            self.on_abnormal_closure(retry_count)
                        }
                    };
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ChannelCommand::Send(envelope)) => {
                            warn!("Dropping command '{}': channel not open", envelope.cmd);
                        }
                        Some(ChannelCommand::SwitchToken(token)) => {
                            self.token = token;
                            *retry_count = 0;
                            return Flow::Connect;
                        }
                        Some(ChannelCommand::ForceDegraded) => return Flow::Degraded,
                        Some(ChannelCommand::Disconnect) => return Flow::Closed,
                        Some(ChannelCommand::Shutdown) | None => return Flow::Exit,
                    }
                }
            }
        }
    }

    async fn run_open(&mut self, mut ws: WsStream, retry_count: &mut u32) -> Flow {
        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ChannelCommand::Send(envelope)) => {
                            let payload = match serde_json::to_string(&envelope) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("Dropping unserializable command '{}': {}", envelope.cmd, e);
                                    continue;
                                }
                            };
                            if let Err(e) = ws.send(Message::Text(payload)).await {
                                warn!("Send failed, treating as abnormal closure: {}", e);
                                return self.on_abnormal_closure(retry_count);
                            }
                            debug!("Sent command '{}'", envelope.cmd);
                        }
                        Some(ChannelCommand::SwitchToken(token)) => {
                            close_normal(&mut ws, "session token changed").await;
                            self.token = token;
                            *retry_count = 0;
                            return Flow::Connect;
                        }
                        Some(ChannelCommand::ForceDegraded) => {
                            close_normal(&mut ws, "degraded mode requested").await;
                            return Flow::Degraded;
                        }
                        Some(ChannelCommand::Disconnect) => {
                            close_normal(&mut ws, "manual disconnect").await;
                            return Flow::Closed;
                        }
                        Some(ChannelCommand::Shutdown) | None => {
                            close_normal(&mut ws, "shutting down").await;
                            return Flow::Exit;
                        }
                    }
                }
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Value>(&text) {
                                Ok(value) => {
                                    debug!("Board message received");
                                    let _ = self.event_tx.send(ChannelEvent::Message(value));
                                }
                                Err(e) => warn!("Discarding malformed board message: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let normal = frame
                                .as_ref()
                                .map(|f| f.code == CloseCode::Normal)
                                .unwrap_or(false);
                            if normal {
                                info!("Board closed the connection normally");
                                return Flow::Closed;
                            }
                            warn!("Abnormal closure from board: {:?}", frame);
                            return self.on_abnormal_closure(retry_count);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Connection error: {}", e);
                            return self.on_abnormal_closure(retry_count);
                        }
                        None => {
                            warn!("Connection dropped by peer");
                            return self.on_abnormal_closure(retry_count);
                        }
                    }
                }
            }
        }
    }

    async fn run_reconnect_wait(&mut self, retry_count: &mut u32) -> Flow {
        self.set_state(ChannelState::ReconnectWait);
        let delay = backoff_delay(&self.config, retry_count.saturating_sub(1));
        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay, retry_count, self.config.max_reconnect_attempts
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Connect,
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ChannelCommand::Send(envelope)) => {
                            warn!("Dropping command '{}': channel not open", envelope.cmd);
                        }
                        Some(ChannelCommand::SwitchToken(token)) => {
                            self.token = token;
                            *retry_count = 0;
                            return Flow::Connect;
                        }
                        Some(ChannelCommand::ForceDegraded) => return Flow::Degraded,
                        Some(ChannelCommand::Disconnect) => return Flow::Closed,
                        Some(ChannelCommand::Shutdown) | None => return Flow::Exit,
                    }
                }
            }
        }
    }

    async fn run_degraded(&mut self, retry_count: &mut u32) -> Flow {
        self.set_state(ChannelState::Degraded);
        let echo_delay = Duration::from_millis(self.config.degraded_echo_delay_ms);

        loop {
            match self.command_rx.recv().await {
                Some(ChannelCommand::Send(envelope)) => {
                    tokio::time::sleep(echo_delay).await;
                    debug!("Simulated echo for '{}'", envelope.cmd);
                    let echo = json!({ "echo": envelope, "simulated": true });
                    let _ = self.event_tx.send(ChannelEvent::Message(echo));
                }
                Some(ChannelCommand::SwitchToken(token)) => {
                    self.token = token;
                    *retry_count = 0;
                    return Flow::Connect;
                }
                Some(ChannelCommand::ForceDegraded) => {}
                Some(ChannelCommand::Disconnect) => return Flow::Closed,
                Some(ChannelCommand::Shutdown) | None => return Flow::Exit,
            }
        }
    }

    async fn run_closed(&mut self, retry_count: &mut u32) -> Flow {
        self.set_state(ChannelState::Closed);

        loop {
            match self.command_rx.recv().await {
                Some(ChannelCommand::Send(envelope)) => {
                    warn!("Dropping command '{}': channel closed", envelope.cmd);
                }
                Some(ChannelCommand::SwitchToken(token)) => {
                    self.token = token;
                    *retry_count = 0;
                    return Flow::Connect;
                }
                Some(ChannelCommand::ForceDegraded) => return Flow::Degraded,
                Some(ChannelCommand::Disconnect) => {}
                Some(ChannelCommand::Shutdown) | None => return Flow::Exit,
            }
        }
    }
}

async fn close_normal(ws: &mut WsStream, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!("Close handshake incomplete: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ChannelConfig {
        // Port 1 is unassigned on loopback, so attempts fail immediately
        ChannelConfig::new()
            .with_host("127.0.0.1:1")
            .with_connect_timeout_ms(200)
            .with_max_reconnect_attempts(3)
            .with_backoff_base_ms(5)
            .with_backoff_cap_ms(20)
            .with_degraded_echo_delay_ms(5)
    }

    #[test]
    fn test_backoff_is_nondecreasing_and_capped() {
        let config = ChannelConfig::new()
            .with_backoff_base_ms(1000)
            .with_backoff_cap_ms(10_000);

        let mut previous = Duration::ZERO;
        for retry in 0..20 {
            let delay = backoff_delay(&config, retry);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(10_000));
            previous = delay;
        }
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_command_envelope_wire_shape() {
        let envelope = CommandEnvelope::new("drawCircle", json!({"x": 10, "y": 10, "radius": 5}));
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            wire,
            json!({"cmd": "drawCircle", "args": {"x": 10, "y": 10, "radius": 5}})
        );
    }

    #[test]
    fn test_state_helpers() {
        assert!(ChannelState::Open.is_open());
        assert!(ChannelState::Degraded.is_degraded());
        assert!(ChannelState::Closed.is_closed());
        assert!(!ChannelState::Connecting.is_open());
        assert_eq!(ChannelState::ReconnectWait.to_string(), "ReconnectWait");
    }

    #[test]
    fn test_unreachable_board_degrades_and_echoes() {
        let (channel, worker) = BoardChannel::new(fast_config(), "abc");
        let handle = worker.start();

        // Drain state changes until the channel degrades
        let mut saw_reconnect_wait = false;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            assert!(
                std::time::Instant::now() < deadline,
                "channel never degraded"
            );
            match channel.recv_event_timeout(Duration::from_secs(1)) {
                Some(ChannelEvent::StateChanged(ChannelState::ReconnectWait)) => {
                    saw_reconnect_wait = true;
                }
                Some(ChannelEvent::StateChanged(ChannelState::Degraded)) => break,
                Some(_) => {}
                None => {}
            }
        }
        assert!(saw_reconnect_wait);
        assert!(channel.state().is_degraded());

        // Degraded sends are acknowledged with a simulated echo
        channel
            .send(CommandEnvelope::new("clearCanvas", json!({})))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let echo = loop {
            assert!(std::time::Instant::now() < deadline, "no echo received");
            match channel.recv_event_timeout(Duration::from_millis(500)) {
                Some(ChannelEvent::Message(value)) => break value,
                Some(_) => {}
                None => {}
            }
        };
        assert_eq!(echo["echo"]["cmd"], "clearCanvas");
        assert_eq!(echo["simulated"], true);

        channel.shutdown().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_disconnect_from_degraded_closes() {
        let config = fast_config().with_max_reconnect_attempts(1);
        let (channel, worker) = BoardChannel::new(config, "abc");
        let handle = worker.start();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            assert!(std::time::Instant::now() < deadline);
            if let Some(ChannelEvent::StateChanged(ChannelState::Degraded)) =
                channel.recv_event_timeout(Duration::from_secs(1))
            {
                break;
            }
        }

        channel.disconnect().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            assert!(std::time::Instant::now() < deadline);
            if let Some(ChannelEvent::StateChanged(ChannelState::Closed)) =
                channel.recv_event_timeout(Duration::from_millis(500))
            {
                break;
            }
        }
        assert!(channel.state().is_closed());

        channel.shutdown().unwrap();
        handle.join().unwrap();
    }
}

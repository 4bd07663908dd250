//! Configuration for the orchestrator, the board channel, and the board server

/// Configuration for the turn-taking orchestrator
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Delay between synthesis finishing and capture re-arming, in milliseconds
    pub settle_delay_ms: u64,

    /// Ceiling after which a silent synthesis engine is abandoned and
    /// listening is force-reactivated, in milliseconds
    pub speak_fallback_ms: u64,

    /// Channel buffer size for commands and events
    pub channel_buffer_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            speak_fallback_ms: 10_000,
            channel_buffer_size: 100,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settle delay before capture re-arms
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Set the synthesis fallback ceiling
    pub fn with_speak_fallback_ms(mut self, ms: u64) -> Self {
        self.speak_fallback_ms = ms;
        self
    }

    /// Set the channel buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

/// Configuration for the resilient board channel
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Host and port of the board server, e.g. `127.0.0.1:8001`
    pub host: String,

    /// Ceiling for a single connection attempt, in milliseconds
    pub connect_timeout_ms: u64,

    /// Abnormal closures tolerated before the channel degrades
    pub max_reconnect_attempts: u32,

    /// Base delay for exponential reconnect backoff, in milliseconds
    pub backoff_base_ms: u64,

    /// Cap on the reconnect backoff delay, in milliseconds
    pub backoff_cap_ms: u64,

    /// Delay before a degraded-mode send is echoed back, in milliseconds
    pub degraded_echo_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:8001".to_string(),
            connect_timeout_ms: 5000,
            max_reconnect_attempts: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 10_000,
            degraded_echo_delay_ms: 100,
        }
    }
}

impl ChannelConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the board server host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the connection-attempt ceiling
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the maximum reconnect attempts before degrading
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the backoff base delay
    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    /// Set the backoff delay cap
    pub fn with_backoff_cap_ms(mut self, ms: u64) -> Self {
        self.backoff_cap_ms = ms;
        self
    }

    /// Set the degraded-mode echo delay
    pub fn with_degraded_echo_delay_ms(mut self, ms: u64) -> Self {
        self.degraded_echo_delay_ms = ms;
        self
    }

    /// WebSocket URL for a session token
    pub fn url_for_token(&self, token: &str) -> String {
        format!("ws://{}/ws/{}", self.host, token)
    }
}

/// Configuration for the board server binary
#[derive(Clone, Debug)]
pub struct BoardConfig {
    /// Address to bind, e.g. `127.0.0.1:8001`
    pub bind_addr: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8001".to_string(),
        }
    }
}

impl BoardConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.settle_delay_ms, 1000);
        assert_eq!(config.speak_fallback_ms, 10_000);
        assert_eq!(config.channel_buffer_size, 100);
    }

    #[test]
    fn test_orchestrator_config_builder() {
        let config = OrchestratorConfig::new()
            .with_settle_delay_ms(10)
            .with_speak_fallback_ms(50)
            .with_channel_buffer_size(8);
        assert_eq!(config.settle_delay_ms, 10);
        assert_eq!(config.speak_fallback_ms, 50);
        assert_eq!(config.channel_buffer_size, 8);
    }

    #[test]
    fn test_channel_config_url() {
        let config = ChannelConfig::new().with_host("127.0.0.1:9000");
        assert_eq!(config.url_for_token("abc"), "ws://127.0.0.1:9000/ws/abc");
    }

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::new()
            .with_max_reconnect_attempts(5)
            .with_backoff_base_ms(10)
            .with_backoff_cap_ms(40)
            .with_connect_timeout_ms(200)
            .with_degraded_echo_delay_ms(1);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff_base_ms, 10);
        assert_eq!(config.backoff_cap_ms, 40);
        assert_eq!(config.connect_timeout_ms, 200);
        assert_eq!(config.degraded_echo_delay_ms, 1);
    }
}

use std::time::Duration;

use crate::errors::ResearchError;

/// Configuration shared by every session an `Engine` creates.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// WebSocket endpoint of the socket backend.
    pub socket_url: String,
    /// HTTP endpoint of the event-stream backend.
    pub event_stream_url: String,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Interval between ping frames on the socket channel.
    pub heartbeat_interval: Duration,
    /// Absolute ceiling for a session to reach a terminal event.
    pub session_timeout: Duration,
    /// Display pacer reveal rate in characters per second.
    pub reveal_rate: u32,
    /// Display pacer frame clock in ticks per second.
    pub frame_rate: u32,
    /// How long a finished thinking trace stays visible after completion.
    pub thinking_grace: Duration,
    /// Lower bound for the delay between completion and ticket resolution.
    pub min_resolve_delay: Duration,
    /// Capacity of the caller command queue.
    pub command_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://localhost:8000/ws/research".to_string(),
            event_stream_url: "http://localhost:8000/api/chat/stream".to_string(),
            connect_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            session_timeout: Duration::from_secs(12 * 60),
            reveal_rate: 150,
            frame_rate: 60,
            thinking_grace: Duration::from_secs(2),
            min_resolve_delay: Duration::from_secs(1),
            command_buffer_capacity: 16,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default timings for the given endpoints.
    pub fn new(socket_url: impl Into<String>, event_stream_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            event_stream_url: event_stream_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from `RESEARCH_*` environment variables.
    ///
    /// Unset variables keep their defaults; set but unparseable values are a
    /// config error.
    pub fn from_env() -> Result<Self, ResearchError> {
        let mut config = Self::default();
        if let Some(url) = env_string("RESEARCH_SOCKET_URL") {
            config.socket_url = url;
        }
        if let Some(url) = env_string("RESEARCH_EVENT_STREAM_URL") {
            config.event_stream_url = url;
        }
        if let Some(secs) = env_number("RESEARCH_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("RESEARCH_SESSION_TIMEOUT_SECS")? {
            config.session_timeout = Duration::from_secs(secs);
        }
        if let Some(rate) = env_number("RESEARCH_REVEAL_RATE")? {
            config.reveal_rate = u32::try_from(rate).map_err(|_| {
                ResearchError::Config(format!("RESEARCH_REVEAL_RATE out of range: {rate}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the socket endpoint.
    pub fn socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = url.into();
        self
    }

    /// Overrides the event-stream endpoint.
    pub fn event_stream_url(mut self, url: impl Into<String>) -> Self {
        self.event_stream_url = url.into();
        self
    }

    /// Overrides the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Overrides the absolute session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Overrides the reveal rate.
    pub fn reveal_rate(mut self, chars_per_second: u32) -> Self {
        self.reveal_rate = chars_per_second;
        self
    }

    /// Overrides the frame clock.
    pub fn frame_rate(mut self, ticks_per_second: u32) -> Self {
        self.frame_rate = ticks_per_second;
        self
    }

    /// Overrides the thinking cleanup grace period.
    pub fn thinking_grace(mut self, grace: Duration) -> Self {
        self.thinking_grace = grace;
        self
    }

    /// Overrides the minimum resolve delay.
    pub fn min_resolve_delay(mut self, delay: Duration) -> Self {
        self.min_resolve_delay = delay;
        self
    }

    /// Rejects values that would stall or spin the session loop.
    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.socket_url.trim().is_empty() || self.event_stream_url.trim().is_empty() {
            return Err(ResearchError::Config("backend urls must not be empty".into()));
        }
        if self.reveal_rate == 0 {
            return Err(ResearchError::Config("reveal_rate must be greater than 0".into()));
        }
        if self.frame_rate == 0 {
            return Err(ResearchError::Config("frame_rate must be greater than 0".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ResearchError::Config(
                "heartbeat_interval must be greater than 0".into(),
            ));
        }
        if self.session_timeout.is_zero() {
            return Err(ResearchError::Config(
                "session_timeout must be greater than 0".into(),
            ));
        }
        if self.command_buffer_capacity == 0 {
            return Err(ResearchError::Config(
                "command_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_number(key: &str) -> Result<Option<u64>, ResearchError> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ResearchError::Config(format!("invalid {key}={raw}: {e}"))),
        None => Ok(None),
    }
}

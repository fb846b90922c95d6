use crate::error::{Result, SoundbarError};
use crate::types::{VolumeLevel, MAX_VOLUME};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::time::Duration;

/// Default TCP port of the soundbar protocol
pub const DEFAULT_PORT: u16 = 9741;

/// Upper bound for the reconnect backoff
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Connection and polling settings for one soundbar
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundbarConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Time allowed for the TCP connect
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,

    /// Interval between info query rounds
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_poll_interval", rename = "poll_interval_secs")]
    pub poll_interval: Duration,

    /// Extra connect attempts after the first one fails
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// First retry delay, doubled per attempt up to [`MAX_BACKOFF`]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_retry_backoff", rename = "retry_backoff_ms")]
    pub retry_backoff: Duration,

    #[serde(default = "default_volume_step")]
    pub volume_step: VolumeLevel,

    /// Reconnect on its own after the device drops the connection
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_volume_step() -> VolumeLevel {
    1
}

fn default_auto_reconnect() -> bool {
    true
}

impl SoundbarConfig {
    /// Defaults for a soundbar at `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: default_connect_timeout(),
            poll_interval: default_poll_interval(),
            connect_retries: default_connect_retries(),
            retry_backoff: default_retry_backoff(),
            volume_step: default_volume_step(),
            auto_reconnect: default_auto_reconnect(),
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SoundbarError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the protocol cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SoundbarError::Config("host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(SoundbarError::Config("port is 0".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(SoundbarError::Config("poll interval is 0".to_string()));
        }
        if self.retry_backoff.is_zero() {
            return Err(SoundbarError::Config("retry backoff is 0".to_string()));
        }
        if self.volume_step == 0 || self.volume_step > MAX_VOLUME {
            return Err(SoundbarError::Config(format!(
                "volume step {} outside 1..={}",
                self.volume_step, MAX_VOLUME
            )));
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_volume_step(mut self, step: VolumeLevel) -> Self {
        self.volume_step = step;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config = SoundbarConfig::from_json(r#"{"host": "10.0.0.7"}"#).unwrap();
        assert_eq!(config, SoundbarConfig::new("10.0.0.7"));
        assert_eq!(config.port, 9741);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_from_json() {
        let config = SoundbarConfig::from_json(
            r#"{"host": "soundbar.local", "port": 9000, "connect_timeout_ms": 250,
                "poll_interval_secs": 10, "auto_reconnect": false}"#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SoundbarConfig::from_json(r#"{"port": 9741}"#).is_err());
        assert!(SoundbarConfig::from_json(r#"{"host": " "}"#).is_err());
        assert!(SoundbarConfig::new("h").with_volume_step(0).validate().is_err());
        assert!(SoundbarConfig::new("h")
            .with_connect_retries(3, Duration::ZERO)
            .validate()
            .is_err());
        assert!(SoundbarConfig::from_json(r#"{"host": "h", "retry_backoff_ms": 0}"#).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SoundbarConfig::new("h").with_connect_retries(10, Duration::from_secs(1));
        assert_eq!(config.backoff_for(1), Duration::from_secs(1));
        assert_eq!(config.backoff_for(3), Duration::from_secs(4));
        assert_eq!(config.backoff_for(8), MAX_BACKOFF);
        assert_eq!(config.backoff_for(40), MAX_BACKOFF);
    }
}

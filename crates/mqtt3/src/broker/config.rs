//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the session engine.
///
/// ```rust
/// use std::time::Duration;
/// use mqtt3::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_resend_interval(Duration::from_secs(5))
///     .with_max_packet_size(256 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Keepalive in seconds assumed for a session before its CONNECT packet
    /// names one.
    #[serde(default = "default_keepalive")]
    pub default_keepalive: u16,

    /// How often the periodic in-flight resend pass runs. Zero disables the
    /// periodic pass; `Session::resend_inflight` stays callable either way.
    #[serde(default = "default_resend_interval", with = "humantime_serde")]
    pub resend_interval: Duration,

    /// Largest accepted remaining-length value for an inbound packet.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Soft cap on bytes queued for a slow peer; pushes beyond it fail.
    #[serde(default = "default_write_buffer_limit")]
    pub write_buffer_limit: usize,

    /// Read size the reader drainer asks the connection for.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_keepalive() -> u16 {
    10
}

fn default_resend_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_packet_size() -> usize {
    1024 * 1024
}

fn default_write_buffer_limit() -> usize {
    1024 * 1024
}

fn default_read_chunk_size() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_keepalive: default_keepalive(),
            resend_interval: default_resend_interval(),
            max_packet_size: default_max_packet_size(),
            write_buffer_limit: default_write_buffer_limit(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_default_keepalive(mut self, seconds: u16) -> Self {
        self.default_keepalive = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_packet_size(mut self, bytes: usize) -> Self {
        self.max_packet_size = bytes;
        self
    }

    #[must_use]
    pub fn with_write_buffer_limit(mut self, bytes: usize) -> Self {
        self.write_buffer_limit = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.default_keepalive, 10);
        assert_eq!(config.resend_interval, Duration::from_secs(1));
        assert_eq!(config.max_packet_size, 1024 * 1024);
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::default()
            .with_resend_interval(Duration::ZERO)
            .with_max_packet_size(512);
        assert_eq!(config.resend_interval, Duration::ZERO);
        assert_eq!(config.max_packet_size, 512);
    }
}

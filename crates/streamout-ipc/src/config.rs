//! Output configuration supplied by the host.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default drop threshold in milliseconds.
pub const DEFAULT_DROP_THRESHOLD_MS: u64 = 600;

/// Default maximum drain time on a timed stop, in seconds.
pub const DEFAULT_MAX_SHUTDOWN_TIME_SECS: u64 = 5;

/// Default upper bound on transmittable units per access unit.
pub const DEFAULT_MAX_UNITS_PER_ACCESS_UNIT: usize = 100;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Ingest host is missing.
    #[error("Ingest host is empty")]
    EmptyHost,

    /// Ingest host could not be parsed as a hostname or address.
    #[error("Invalid ingest host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },

    /// A numeric setting is out of range.
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// The configuration document could not be parsed.
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for a single ingest output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Ingest hostname or address (e.g., "ingest.example.com").
    pub ingest_host: String,

    /// Stream key used to authenticate the channel.
    pub stream_key: String,

    /// Optional service username.
    pub username: Option<String>,

    /// Optional service password.
    pub password: Option<String>,

    /// Local address to bind to, or "default".
    pub bind_ip: String,

    /// Queued media span (ms) beyond which low-priority video is dropped.
    pub drop_threshold_ms: u64,

    /// Upper bound on how long a timed stop keeps draining, in seconds.
    pub max_shutdown_time_secs: u64,

    /// Target video bitrate in kbps.
    pub video_bitrate_kbps: u32,

    /// Known peak bitrate in kbps; measured with a speed test when unset.
    pub peak_bitrate_kbps: Option<u32>,

    /// Vendor name reported to the ingest.
    pub vendor_name: String,

    /// Vendor version reported to the ingest.
    pub vendor_version: String,

    /// Upper bound on units extracted from one access unit.
    pub max_units_per_access_unit: usize,

    /// Status poll timeout in milliseconds.
    pub status_poll_timeout_ms: u64,

    /// Speed test target in kbps.
    pub speed_test_kbps: u32,

    /// Speed test duration in milliseconds.
    pub speed_test_duration_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            ingest_host: String::new(),
            stream_key: String::new(),
            username: None,
            password: None,
            bind_ip: "default".to_string(),
            drop_threshold_ms: DEFAULT_DROP_THRESHOLD_MS,
            max_shutdown_time_secs: DEFAULT_MAX_SHUTDOWN_TIME_SECS,
            video_bitrate_kbps: 6000,
            peak_bitrate_kbps: None,
            vendor_name: "streamout".to_string(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            max_units_per_access_unit: DEFAULT_MAX_UNITS_PER_ACCESS_UNIT,
            status_poll_timeout_ms: 1000,
            speed_test_kbps: 15000,
            speed_test_duration_ms: 2000,
        }
    }
}

impl OutputConfig {
    /// Parse a configuration from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> crate::ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Drop threshold in microseconds.
    pub fn drop_threshold_usec(&self) -> i64 {
        i64::try_from(self.drop_threshold_ms.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Ingest host with surrounding whitespace removed.
    pub fn host(&self) -> &str {
        self.ingest_host.trim()
    }

    /// Check that the configuration can be used to start a session.
    pub fn validate(&self) -> crate::ConfigResult<()> {
        let host = self.host();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        url::Host::parse(host).map_err(|e| ConfigError::InvalidHost {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        if self.max_units_per_access_unit == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max_units_per_access_unit",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.status_poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "status_poll_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> OutputConfig {
        OutputConfig {
            ingest_host: "ingest.example.com".to_string(),
            stream_key: "123-abc".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = OutputConfig::default();
        assert_eq!(config.drop_threshold_ms, 600);
        assert_eq!(config.max_shutdown_time_secs, 5);
        assert_eq!(config.max_units_per_access_unit, 100);
        assert_eq!(config.drop_threshold_usec(), 600_000);
        assert_eq!(config.bind_ip, "default");
    }

    #[test]
    fn test_validate_accepts_hostname_and_address() {
        assert!(valid().validate().is_ok());

        let config = OutputConfig {
            ingest_host: " 10.0.0.7 ".to_string(),
            ..valid()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.host(), "10.0.0.7");
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let config = OutputConfig {
            ingest_host: "   ".to_string(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyHost)));
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let config = OutputConfig {
            ingest_host: "bad host/with spaces".to_string(),
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_unit_cap() {
        let config = OutputConfig {
            max_units_per_access_unit: 0,
            ..valid()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            OutputConfig::from_json(r#"{"ingest_host": "ingest.example.com", "drop_threshold_ms": 900}"#)
                .unwrap();
        assert_eq!(config.ingest_host, "ingest.example.com");
        assert_eq!(config.drop_threshold_ms, 900);
        assert_eq!(config.max_shutdown_time_secs, 5);
        assert!(config.peak_bitrate_kbps.is_none());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            OutputConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}

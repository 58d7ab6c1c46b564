//! # Meter Configuration
//!
//! The external caller supplies a device path, a polling interval and a bus
//! address; everything else has defaults tuned for an optical head at 2400 baud.
//! A configuration can be loaded from a JSON file and then overridden field by
//! field (the CLI does this with its flags).

use crate::constants::MBUS_ADDRESS_BROADCAST_REPLY;
use crate::error::MBusError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyUSB0";
pub const DEFAULT_UPDATE_INTERVAL_SECONDS: u64 = 60;
pub const MIN_UPDATE_INTERVAL_SECONDS: u64 = 10;
pub const MAX_UPDATE_INTERVAL_SECONDS: u64 = 3600;

/// Top-level configuration for one meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub device_path: String,
    /// 0 disables the scheduler; manual refreshes still work.
    pub update_interval_seconds: u64,
    pub primary_address: u8,
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
}

impl Default for MeterConfig {
    fn default() -> Self {
        MeterConfig {
            device_path: DEFAULT_DEVICE_PATH.to_string(),
            update_interval_seconds: DEFAULT_UPDATE_INTERVAL_SECONDS,
            primary_address: MBUS_ADDRESS_BROADCAST_REPLY,
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl MeterConfig {
    pub fn new(device_path: impl Into<String>) -> Self {
        MeterConfig {
            device_path: device_path.into(),
            ..Default::default()
        }
    }

    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MBusError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MBusError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, MBusError> {
        let config: MeterConfig =
            serde_json::from_str(text).map_err(|e| MBusError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `None` when automatic polling is disabled.
    pub fn update_interval(&self) -> Option<Duration> {
        match self.update_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn validate(&self) -> Result<(), MBusError> {
        if self.device_path.trim().is_empty() {
            return Err(MBusError::InvalidConfig("device_path is empty".into()));
        }

        let interval = self.update_interval_seconds;
        if interval != 0
            && !(MIN_UPDATE_INTERVAL_SECONDS..=MAX_UPDATE_INTERVAL_SECONDS).contains(&interval)
        {
            return Err(MBusError::InvalidConfig(format!(
                "update_interval_seconds must be 0 or {MIN_UPDATE_INTERVAL_SECONDS}-{MAX_UPDATE_INTERVAL_SECONDS}, got {interval}"
            )));
        }

        self.transport.validate()?;
        self.retry.validate()?;

        if let Some(interval) = self.update_interval() {
            if self.transport.response_timeout() >= interval {
                return Err(MBusError::InvalidConfig(format!(
                    "response timeout {:?} must be shorter than the update interval {:?}",
                    self.transport.response_timeout(),
                    interval
                )));
            }
        }
        Ok(())
    }
}

/// Timing of the optical link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub wake_duration_ms: u64,
    pub wake_chunk_len: usize,
    pub post_wake_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            wake_duration_ms: 2200,
            wake_chunk_len: 32,
            post_wake_delay_ms: 350,
            settle_delay_ms: 350,
            response_timeout_ms: 2500,
        }
    }
}

impl TransportConfig {
    pub fn wake_duration(&self) -> Duration {
        Duration::from_millis(self.wake_duration_ms)
    }

    pub fn post_wake_delay(&self) -> Duration {
        Duration::from_millis(self.post_wake_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    fn validate(&self) -> Result<(), MBusError> {
        if self.wake_duration_ms == 0 || self.wake_chunk_len == 0 {
            return Err(MBusError::InvalidConfig(
                "wake window and wake chunk must be non-zero".into(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(MBusError::InvalidConfig(
                "response_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Failure handling of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failures before readings are reported unavailable.
    pub failure_threshold: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            failure_threshold: 3,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 300_000,
            jitter_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `consecutive_failures` failures in a row,
    /// without jitter. Doubles per failure, capped at `max_backoff_ms`.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(20);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn validate(&self) -> Result<(), MBusError> {
        if self.failure_threshold == 0 {
            return Err(MBusError::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(MBusError::InvalidConfig(
                "backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MeterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_address, 0xFE);
        assert_eq!(config.update_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = MeterConfig::default();
        config.update_interval_seconds = 0;
        assert!(config.validate().is_ok());
        assert_eq!(config.update_interval(), None);

        config.update_interval_seconds = 9;
        assert!(config.validate().is_err());
        config.update_interval_seconds = 3601;
        assert!(config.validate().is_err());
        config.update_interval_seconds = 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_must_be_shorter_than_interval() {
        let mut config = MeterConfig::default();
        config.update_interval_seconds = 10;
        config.transport.response_timeout_ms = 10_000;
        assert!(matches!(config.validate(), Err(MBusError::InvalidConfig(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            failure_threshold: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            jitter_ms: 0,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            MeterConfig::from_json_str(r#"{"device_path": "/dev/ttyUSB1", "primary_address": 0}"#)
                .unwrap();
        assert_eq!(config.device_path, "/dev/ttyUSB1");
        assert_eq!(config.primary_address, 0);
        assert_eq!(config.update_interval_seconds, 60);
        assert_eq!(config.transport.wake_duration_ms, 2200);
    }

    #[test]
    fn test_json_out_of_range_address_rejected() {
        let result = MeterConfig::from_json_str(r#"{"primary_address": 256}"#);
        assert!(matches!(result, Err(MBusError::InvalidConfig(_))));
    }
}

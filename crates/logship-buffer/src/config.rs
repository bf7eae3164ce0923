// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::error::BufferError;

const DEFAULT_PARTITIONS: u32 = 4;
const DEFAULT_HIGH_WATER_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_LOW_WATER_BYTES: usize = 6 * 1024 * 1024;
const DEFAULT_RETENTION_MAX_AGE_SECS: u64 = 3600;
const DEFAULT_RETENTION_MAX_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_SAFETY_MARGIN: u64 = 128;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_IDEMPOTENCY_WINDOW: usize = 1024;

/// Configuration for the ingest buffer.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Number of partitions records are hashed into.
    pub partitions: u32,
    /// Per-partition buffered-bytes threshold above which appends are
    /// rejected with backpressure.
    pub high_water_bytes: usize,
    /// Once saturated, appends stay rejected until buffered bytes fall
    /// below this mark (hysteresis, avoids oscillation at the threshold).
    pub low_water_bytes: usize,
    /// Records older than this are eligible for purge.
    pub retention_max_age: Duration,
    /// Per-partition size cap beyond which the oldest records are purged.
    pub retention_max_bytes: usize,
    /// Number of offsets behind the minimum committed offset that the
    /// sweep keeps around for slow consumers.
    pub safety_margin: u64,
    /// How often the service runs its retention sweep.
    pub sweep_interval: Duration,
    /// How many recent idempotency tokens each partition remembers for
    /// retry-safe re-appends.
    pub idempotency_window: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            high_water_bytes: DEFAULT_HIGH_WATER_BYTES,
            low_water_bytes: DEFAULT_LOW_WATER_BYTES,
            retention_max_age: Duration::from_secs(DEFAULT_RETENTION_MAX_AGE_SECS),
            retention_max_bytes: DEFAULT_RETENTION_MAX_BYTES,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            idempotency_window: DEFAULT_IDEMPOTENCY_WINDOW,
        }
    }
}

impl BufferConfig {
    /// Build configuration from `LOGSHIP_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, BufferError> {
        let mut config = Self::default();
        if let Some(partitions) = read_env("LOGSHIP_BUFFER_PARTITIONS") {
            config.partitions = partitions;
        }
        if let Some(high) = read_env("LOGSHIP_BUFFER_HIGH_WATER_BYTES") {
            config.high_water_bytes = high;
        }
        if let Some(low) = read_env("LOGSHIP_BUFFER_LOW_WATER_BYTES") {
            config.low_water_bytes = low;
        }
        if let Some(secs) = read_env("LOGSHIP_BUFFER_RETENTION_MAX_AGE_SECS") {
            config.retention_max_age = Duration::from_secs(secs);
        }
        if let Some(bytes) = read_env("LOGSHIP_BUFFER_RETENTION_MAX_BYTES") {
            config.retention_max_bytes = bytes;
        }
        if let Some(margin) = read_env("LOGSHIP_BUFFER_SAFETY_MARGIN") {
            config.safety_margin = margin;
        }
        if let Some(secs) = read_env("LOGSHIP_BUFFER_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(window) = read_env("LOGSHIP_BUFFER_IDEMPOTENCY_WINDOW") {
            config.idempotency_window = window;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BufferError> {
        if self.partitions == 0 {
            return Err(BufferError::InvalidInput(
                "partition count must be greater than 0".to_string(),
            ));
        }
        if self.low_water_bytes >= self.high_water_bytes {
            return Err(BufferError::InvalidInput(format!(
                "low-water mark ({}) must be below high-water mark ({})",
                self.low_water_bytes, self.high_water_bytes
            )));
        }
        if self.idempotency_window == 0 {
            return Err(BufferError::InvalidInput(
                "idempotency window must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BufferConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let config = BufferConfig {
            partitions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_reads_idempotency_window() {
        env::set_var("LOGSHIP_BUFFER_IDEMPOTENCY_WINDOW", "32");
        let config = BufferConfig::from_env().unwrap();
        env::remove_var("LOGSHIP_BUFFER_IDEMPOTENCY_WINDOW");
        assert_eq!(config.idempotency_window, 32);
    }

    #[test]
    fn test_validate_rejects_inverted_water_marks() {
        let config = BufferConfig {
            high_water_bytes: 100,
            low_water_bytes: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProducerError;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 500;
const DEFAULT_MAX_BATCH_RECORDS: usize = 128;
const DEFAULT_RETRY_BUDGET: u32 = 4;
const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 50;
const DEFAULT_SHIP_INTERVAL_MS: u64 = 200;

/// What `append` does when the local queue for a partition key is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowMode {
    /// Wait for queue space up to the configured block timeout.
    Block,
    /// Drop the record and count it; the caller sees success.
    Drop,
    /// Return a backpressure error immediately.
    FailFast,
}

impl FromStr for OverflowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(OverflowMode::Block),
            "drop" => Ok(OverflowMode::Drop),
            "fail_fast" | "failfast" => Ok(OverflowMode::FailFast),
            other => Err(format!("unknown overflow mode '{other}'")),
        }
    }
}

/// Configuration for the producer client.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Bounded local queue capacity, per partition key.
    pub queue_capacity: usize,
    /// Overflow policy when a local queue is full.
    pub overflow_mode: OverflowMode,
    /// How long `append` may wait for space in `Block` mode.
    pub block_timeout: Duration,
    /// Maximum records per transmitted batch.
    pub max_batch_records: usize,
    /// Delivery attempts per batch before spilling.
    pub retry_budget: u32,
    /// Base backoff between delivery retries; doubles per attempt.
    pub retry_backoff_base: Duration,
    /// How often the background shipper drains the local queues.
    pub ship_interval: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_mode: OverflowMode::Block,
            block_timeout: Duration::from_millis(DEFAULT_BLOCK_TIMEOUT_MS),
            max_batch_records: DEFAULT_MAX_BATCH_RECORDS,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_backoff_base: Duration::from_millis(DEFAULT_RETRY_BACKOFF_BASE_MS),
            ship_interval: Duration::from_millis(DEFAULT_SHIP_INTERVAL_MS),
        }
    }
}

impl ProducerConfig {
    pub fn from_env() -> Result<Self, ProducerError> {
        let mut config = Self::default();
        if let Some(capacity) = read_env("LOGSHIP_PRODUCER_QUEUE_CAPACITY") {
            config.queue_capacity = capacity;
        }
        if let Some(mode) = read_env::<OverflowMode>("LOGSHIP_PRODUCER_OVERFLOW_MODE") {
            config.overflow_mode = mode;
        }
        if let Some(ms) = read_env("LOGSHIP_PRODUCER_BLOCK_TIMEOUT_MS") {
            config.block_timeout = Duration::from_millis(ms);
        }
        if let Some(batch) = read_env("LOGSHIP_PRODUCER_MAX_BATCH_RECORDS") {
            config.max_batch_records = batch;
        }
        if let Some(budget) = read_env("LOGSHIP_PRODUCER_RETRY_BUDGET") {
            config.retry_budget = budget;
        }
        if let Some(ms) = read_env("LOGSHIP_PRODUCER_RETRY_BACKOFF_BASE_MS") {
            config.retry_backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env("LOGSHIP_PRODUCER_SHIP_INTERVAL_MS") {
            config.ship_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProducerError> {
        if self.queue_capacity == 0 {
            return Err(ProducerError::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_batch_records == 0 {
            return Err(ProducerError::InvalidConfig(
                "batch size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ProducerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overflow_mode_parsing() {
        assert_eq!("block".parse::<OverflowMode>().unwrap(), OverflowMode::Block);
        assert_eq!("DROP".parse::<OverflowMode>().unwrap(), OverflowMode::Drop);
        assert_eq!(
            "fail_fast".parse::<OverflowMode>().unwrap(),
            OverflowMode::FailFast
        );
        assert!("explode".parse::<OverflowMode>().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = ProducerConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

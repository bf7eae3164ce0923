// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use logship_buffer::BufferConfig;
use logship_consumer::ConsumerConfig;

use crate::error::PipelineError;

const DEFAULT_CONSUMERS: u32 = 2;
const DEFAULT_ALERT_EVAL_INTERVAL_SECS: u64 = 10;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

/// Configuration for the whole pipeline: ambient settings here, the
/// buffer's and consumers' knobs in their own nested configs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Log level (e.g. trace, debug, info, warn, error).
    pub log_level: String,
    /// Number of consumer instances sharing the group.
    pub consumers: u32,
    pub buffer: BufferConfig,
    /// Template for each consumer instance; the member id gets an index
    /// suffix per instance.
    pub consumer: ConsumerConfig,
    /// How often registered alerts are evaluated.
    pub alert_eval_interval: Duration,
    /// How often partition stats are written to the log.
    pub status_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            consumers: DEFAULT_CONSUMERS,
            buffer: BufferConfig::default(),
            consumer: ConsumerConfig::default(),
            alert_eval_interval: Duration::from_secs(DEFAULT_ALERT_EVAL_INTERVAL_SECS),
            status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
        }
    }
}

impl PipelineConfig {
    /// Build configuration from `LOGSHIP_*` environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut config = Self::default();
        if let Ok(level) = env::var("LOGSHIP_LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        if let Some(consumers) = read_env("LOGSHIP_CONSUMERS") {
            config.consumers = consumers;
        }
        if let Some(secs) = read_env("LOGSHIP_ALERT_EVAL_INTERVAL_SECS") {
            config.alert_eval_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("LOGSHIP_STATUS_INTERVAL_SECS") {
            config.status_interval = Duration::from_secs(secs);
        }
        config.buffer = BufferConfig::from_env()?;
        config.consumer = ConsumerConfig::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "invalid log level '{}', must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        if self.consumers == 0 {
            return Err(PipelineError::InvalidConfig(
                "consumer count must be greater than 0".to_string(),
            ));
        }
        self.buffer.validate()?;
        self.consumer.validate()?;
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.parse::<T>().ok())
}

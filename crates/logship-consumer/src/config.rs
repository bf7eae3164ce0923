// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::error::ConsumerError;

const DEFAULT_GROUP: &str = "indexers";
const DEFAULT_INDEX: &str = "logs";
const DEFAULT_FETCH_BATCH_SIZE: usize = 64;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_DEAD_LETTER_CAPACITY: usize = 256;

/// Configuration for one consumer instance.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group this instance joins.
    pub group: String,
    /// Member id, unique within the group.
    pub member: String,
    /// Target index for transformed records.
    pub index: String,
    /// Maximum records per fetch.
    pub fetch_batch_size: usize,
    /// Sleep between fetches when a partition has nothing new.
    pub poll_interval: Duration,
    /// Bound on the dead-letter channel; entries beyond it are dropped
    /// with a warning.
    pub dead_letter_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            member: "consumer".to_string(),
            index: DEFAULT_INDEX.to_string(),
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

impl ConsumerConfig {
    /// Build configuration from `LOGSHIP_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, ConsumerError> {
        let mut config = Self::default();
        if let Ok(group) = env::var("LOGSHIP_CONSUMER_GROUP") {
            config.group = group;
        }
        if let Ok(member) = env::var("LOGSHIP_CONSUMER_MEMBER") {
            config.member = member;
        }
        if let Ok(index) = env::var("LOGSHIP_CONSUMER_INDEX") {
            config.index = index;
        }
        if let Some(size) = read_env("LOGSHIP_CONSUMER_FETCH_BATCH_SIZE") {
            config.fetch_batch_size = size;
        }
        if let Some(ms) = read_env("LOGSHIP_CONSUMER_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = read_env("LOGSHIP_CONSUMER_DEAD_LETTER_CAPACITY") {
            config.dead_letter_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.group.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "group id must not be empty".to_string(),
            ));
        }
        if self.member.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "member id must not be empty".to_string(),
            ));
        }
        if self.index.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "target index must not be empty".to_string(),
            ));
        }
        if self.fetch_batch_size == 0 {
            return Err(ConsumerError::InvalidConfig(
                "fetch batch size must be greater than 0".to_string(),
            ));
        }
        if self.dead_letter_capacity == 0 {
            return Err(ConsumerError::InvalidConfig(
                "dead-letter capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.parse::<T>().ok())
}

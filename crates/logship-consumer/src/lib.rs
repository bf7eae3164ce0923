// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! The consumer/aggregator: group membership, per-partition
//! fetch→transform→sink→commit loops, transform rules and the
//! dead-letter path.

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod rules;

pub use config::ConsumerConfig;
pub use consumer::{Consumer, ConsumerCounters, ConsumerStatus};
pub use dead_letter::{dead_letter_channel, DeadLetterEntry, DeadLetterQueue};
pub use error::ConsumerError;
pub use rules::{apply_rules, EnrichRule, FilterRule, ParseFailure, ParseRule, TransformRule};

// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Durable ordered ingest buffer.
//!
//! The buffer is the single point of ordering in the pipeline: it owns all
//! partitions, assigns strictly increasing offsets on append, serves
//! non-destructive fetches to consumer groups, tracks committed offsets
//! with generation fencing, and purges old records under its retention
//! policy. It runs as a command-channel service ([`BufferService`]) with a
//! cloneable [`BufferHandle`] for producers and consumers.

pub mod config;
pub mod error;
pub mod group;
pub mod partition;
pub mod service;

pub use config::BufferConfig;
pub use error::BufferError;
pub use group::assign_partitions;
pub use partition::FetchResponse;
pub use service::{BufferHandle, BufferService, GroupMembership, PartitionStats};

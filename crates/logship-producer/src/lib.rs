// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Producer client library.
//!
//! Services embed a [`Producer`] to append log records without blocking
//! their request handling: `append` only touches a bounded local queue,
//! and a background shipper task batches, transmits and retries against
//! the ingest buffer with at-least-once semantics.

pub mod config;
pub mod error;
pub mod producer;
pub mod queue;
pub mod shipper;
pub mod transport;

pub use config::{OverflowMode, ProducerConfig};
pub use error::ProducerError;
pub use producer::{Producer, ProducerStats};
pub use shipper::{FlushReport, SpillSink};
pub use transport::{BufferTransport, RecordTransport, TransportError};

// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Canonical structured log event types shared by every pipeline component.
//!
//! The model crate defines [`LogRecord`], the immutable unit appended by
//! producers and buffered by the ingest buffer, plus the derived types
//! produced downstream: [`TransformedRecord`] (output of the
//! consumer/aggregator) and [`IndexDocument`] (the unit persisted by the
//! indexing sink).

pub mod record;
pub mod severity;
pub mod transformed;

pub use record::{AttrValue, Attributes, LogRecord, RecordError};
pub use severity::Severity;
pub use transformed::{doc_id, IndexDocument, TransformedRecord};

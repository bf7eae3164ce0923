// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Indexing sink and the read-only query/alert surface on top of it.
//!
//! The sink persists transformed records as [`IndexDocument`]s keyed by a
//! stable document id, which makes redelivery after a consumer crash safe:
//! re-writing the same id with the same body is a visible no-op. Schema
//! mappings are inferred per index at this boundary, not baked into the
//! record type.
//!
//! [`IndexDocument`]: logship_model::IndexDocument

pub mod alerts;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;
pub mod writer;

pub use alerts::{AlertCondition, AlertId, AlertRegistry, AlertScheduler, FiredAlert};
pub use error::SinkError;
pub use query::{SearchPage, SearchQuery, TimeRange};
pub use schema::FieldKind;
pub use store::{BatchResult, IndexStore};
pub use writer::BatchWriter;

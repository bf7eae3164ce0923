// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! The immutable log record appended by producers.
//!
//! Records carry an open, schema-less attribute map of scalar values.
//! Index schema mapping is inferred and validated at the sink boundary,
//! not baked into the record type.

use std::collections::BTreeMap;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::severity::Severity;

/// A scalar attribute value attached to a log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Open mapping of structured attributes. Insertion order is irrelevant,
/// so a sorted map keeps equality and serialization stable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Errors raised when constructing a [`LogRecord`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("service identifier must not be empty")]
    EmptyService,

    #[error("timestamp must be positive, got {0}")]
    InvalidTimestamp(i64),
}

/// A single structured log event.
///
/// Records are immutable once created: every field is read via accessors
/// and downstream stages produce new derived records instead of mutating
/// the original. The service identifier doubles as the partition key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    timestamp_ms: i64,
    service: String,
    severity: Severity,
    message: String,
    #[serde(default)]
    attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
}

impl LogRecord {
    /// Create a record. The service identifier and timestamp are mandatory;
    /// everything else has an empty default.
    pub fn new(
        timestamp_ms: i64,
        service: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Result<Self, RecordError> {
        let service = service.into();
        if service.is_empty() {
            return Err(RecordError::EmptyService);
        }
        if timestamp_ms <= 0 {
            return Err(RecordError::InvalidTimestamp(timestamp_ms));
        }
        Ok(LogRecord {
            timestamp_ms,
            service,
            severity,
            message: message.into(),
            attributes: Attributes::new(),
            trace_id: None,
        })
    }

    /// Attach structured attributes, consuming and returning the record.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// The partition key: derived from the service identifier so that one
    /// service's records always land in the same partition, preserving
    /// per-service ordering.
    pub fn partition_key(&self) -> &str {
        &self.service
    }

    /// Map a partition key onto one of `partition_count` partitions.
    pub fn partition_index(key: &str, partition_count: u32) -> u32 {
        let mut hasher = FnvHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(partition_count)) as u32
    }

    /// Approximate in-memory size, used by the buffer for byte accounting
    /// against its high/low water marks.
    pub fn encoded_len(&self) -> usize {
        let attrs: usize = self
            .attributes
            .iter()
            .map(|(k, v)| {
                k.len()
                    + match v {
                        AttrValue::Str(s) => s.len(),
                        _ => 8,
                    }
            })
            .sum();
        8 + self.service.len()
            + self.message.len()
            + attrs
            + self.trace_id.as_ref().map_or(0, |t| t.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LogRecord {
        LogRecord::new(1_700_000_000_000, "checkout", Severity::Info, "order placed")
            .unwrap()
            .with_attr("order_id", 42i64)
            .with_trace_id("abc123")
    }

    #[test]
    fn test_mandatory_fields_enforced() {
        assert!(matches!(
            LogRecord::new(1, "", Severity::Info, "x"),
            Err(RecordError::EmptyService)
        ));
        assert!(matches!(
            LogRecord::new(0, "svc", Severity::Info, "x"),
            Err(RecordError::InvalidTimestamp(0))
        ));
    }

    #[test]
    fn test_partition_key_is_service() {
        let r = record();
        assert_eq!(r.partition_key(), "checkout");
    }

    #[test]
    fn test_partition_index_stable_and_in_range() {
        let a = LogRecord::partition_index("checkout", 8);
        let b = LogRecord::partition_index("checkout", 8);
        assert_eq!(a, b);
        assert!(a < 8);
        for key in ["auth", "catalog", "users", "payments"] {
            assert!(LogRecord::partition_index(key, 4) < 4);
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let r = record();
        let json = serde_json::to_string(&r).unwrap();
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_encoded_len_counts_payload() {
        let small = LogRecord::new(1, "s", Severity::Info, "m").unwrap();
        let large = record().with_attr("blob", "x".repeat(1024));
        assert!(large.encoded_len() > small.encoded_len() + 1000);
    }
}

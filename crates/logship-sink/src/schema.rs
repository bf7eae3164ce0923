// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Per-index schema mapping, inferred at the sink boundary.
//!
//! Log attributes are schema-less on the wire; the first document to carry
//! a field fixes that field's scalar kind for the index. Later documents
//! whose value disagrees are rejected individually.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use logship_model::{AttrValue, IndexDocument};

/// Scalar kind of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
}

impl FieldKind {
    pub fn of(value: &AttrValue) -> FieldKind {
        match value {
            AttrValue::Str(_) => FieldKind::Str,
            AttrValue::Int(_) => FieldKind::Int,
            AttrValue::Float(_) => FieldKind::Float,
            AttrValue::Bool(_) => FieldKind::Bool,
        }
    }
}

/// Field-name to scalar-kind mapping for one index.
#[derive(Debug, Default, Clone)]
pub struct SchemaMapping {
    fields: HashMap<String, FieldKind>,
}

impl SchemaMapping {
    /// Validate a document against the mapping, extending it with any
    /// fields seen for the first time. Returns the rejection reason on a
    /// kind mismatch; a rejected document leaves the mapping untouched.
    pub fn validate_and_extend(&mut self, document: &IndexDocument) -> Result<(), String> {
        for (field, value) in &document.attributes {
            let kind = FieldKind::of(value);
            if let Some(&existing) = self.fields.get(field) {
                if existing != kind {
                    return Err(format!(
                        "field '{field}' is mapped as {existing:?} but document has {kind:?}"
                    ));
                }
            }
        }
        for (field, value) in &document.attributes {
            self.fields
                .entry(field.clone())
                .or_insert_with(|| FieldKind::of(value));
        }
        Ok(())
    }

    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.fields.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::Severity;

    fn doc(doc_id: &str, attrs: &[(&str, AttrValue)]) -> IndexDocument {
        IndexDocument {
            doc_id: doc_id.to_string(),
            timestamp_ms: 1,
            service: "svc".to_string(),
            severity: Severity::Info,
            message: "m".to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_first_write_fixes_kind() {
        let mut mapping = SchemaMapping::default();
        mapping
            .validate_and_extend(&doc("a", &[("latency", AttrValue::Int(12))]))
            .unwrap();
        assert_eq!(mapping.field_kind("latency"), Some(FieldKind::Int));

        let err = mapping
            .validate_and_extend(&doc("b", &[("latency", AttrValue::Str("slow".into()))]))
            .unwrap_err();
        assert!(err.contains("latency"));
        // The mapping is unchanged by the rejected document.
        assert_eq!(mapping.field_kind("latency"), Some(FieldKind::Int));
    }

    #[test]
    fn test_matching_kinds_pass() {
        let mut mapping = SchemaMapping::default();
        mapping
            .validate_and_extend(&doc("a", &[("ok", AttrValue::Bool(true))]))
            .unwrap();
        mapping
            .validate_and_extend(&doc("b", &[("ok", AttrValue::Bool(false))]))
            .unwrap();
        assert_eq!(mapping.len(), 1);
    }
}

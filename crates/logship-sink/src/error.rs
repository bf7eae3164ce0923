// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

/// Errors raised by the indexing sink and query surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// A document conflicted with the index's inferred schema mapping.
    /// The document is skipped; the rest of its batch proceeds.
    #[error("document '{doc_id}' rejected: {reason}")]
    Rejection { doc_id: String, reason: String },

    /// Unknown index or malformed query parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SinkError::Rejection {
            doc_id: "svc-0-1".to_string(),
            reason: "field 'latency' changed kind".to_string(),
        };
        assert!(err.to_string().contains("svc-0-1"));
    }
}

// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Transform rules applied between fetch and sink write.
//!
//! Rules are pure functions over one record: each yields zero or one
//! output records, and the pipeline runs them in order. A `ParseFailure`
//! sends the record to the dead-letter path; `Ok(None)` drops it quietly.

use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde_json::Value;

use logship_model::{AttrValue, Attributes, LogRecord, Severity};

/// A record that could not be transformed. Carries the reason shown in
/// the dead-letter log.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ParseFailure {
    pub reason: String,
}

impl ParseFailure {
    fn new(reason: impl Into<String>) -> Self {
        ParseFailure {
            reason: reason.into(),
        }
    }
}

pub trait TransformRule: Send + Sync {
    /// Apply the rule. `Ok(None)` drops the record; `Err` dead-letters it.
    fn apply(&self, record: LogRecord) -> Result<Option<LogRecord>, ParseFailure>;
}

/// Run an ordered rule chain over one record.
pub fn apply_rules(
    rules: &[Box<dyn TransformRule>],
    record: LogRecord,
) -> Result<Option<LogRecord>, ParseFailure> {
    let mut current = record;
    for rule in rules {
        match rule.apply(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Extracts structured fields from the message text.
///
/// A message starting with `{` is treated as a JSON object and must parse
/// as one; its top-level scalar fields become attributes. Anything else is
/// scanned for logfmt-style `key=value` pairs. Fields already present as
/// attributes are never overwritten.
#[derive(Debug, Default)]
pub struct ParseRule;

impl TransformRule for ParseRule {
    fn apply(&self, record: LogRecord) -> Result<Option<LogRecord>, ParseFailure> {
        let message = record.message();
        let parsed = if message.trim_start().starts_with('{') {
            parse_json(message)?
        } else {
            parse_logfmt(message)
        };
        if parsed.is_empty() {
            return Ok(Some(record));
        }
        let mut attributes = record.attributes().clone();
        for (key, value) in parsed {
            attributes.entry(key).or_insert(value);
        }
        Ok(Some(record.with_attributes(attributes)))
    }
}

fn parse_json(message: &str) -> Result<Attributes, ParseFailure> {
    let value: Value = serde_json::from_str(message)
        .map_err(|e| ParseFailure::new(format!("invalid JSON message: {e}")))?;
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(ParseFailure::new(format!(
                "JSON message is not an object: {other}"
            )))
        }
    };
    let mut attributes = Attributes::new();
    for (key, value) in object {
        let attr = match value {
            Value::String(s) => AttrValue::Str(s),
            Value::Bool(b) => AttrValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Int(i),
                None => AttrValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            // Nested objects, arrays and nulls are not indexable scalars.
            _ => continue,
        };
        attributes.insert(key, attr);
    }
    Ok(attributes)
}

fn parse_logfmt(message: &str) -> Attributes {
    let mut attributes = Attributes::new();
    for token in message.split_whitespace() {
        let Some((key, raw)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() || raw.is_empty() {
            continue;
        }
        let raw = raw.trim_matches('"');
        attributes.insert(key.to_string(), parse_scalar(raw));
    }
    attributes
}

fn parse_scalar(raw: &str) -> AttrValue {
    if let Ok(i) = raw.parse::<i64>() {
        return AttrValue::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return AttrValue::Float(f);
    }
    if let Ok(b) = raw.parse::<bool>() {
        return AttrValue::Bool(b);
    }
    AttrValue::Str(raw.to_string())
}

/// Drops records below a minimum severity or matching a message pattern.
#[derive(Debug, Default)]
pub struct FilterRule {
    min_severity: Option<Severity>,
    drop_pattern: Option<Regex>,
}

impl FilterRule {
    pub fn min_severity(severity: Severity) -> Self {
        FilterRule {
            min_severity: Some(severity),
            drop_pattern: None,
        }
    }

    pub fn drop_matching(pattern: Regex) -> Self {
        FilterRule {
            min_severity: None,
            drop_pattern: Some(pattern),
        }
    }

    pub fn with_drop_pattern(mut self, pattern: Regex) -> Self {
        self.drop_pattern = Some(pattern);
        self
    }
}

impl TransformRule for FilterRule {
    fn apply(&self, record: LogRecord) -> Result<Option<LogRecord>, ParseFailure> {
        if let Some(min) = self.min_severity {
            if record.severity() < min {
                return Ok(None);
            }
        }
        if let Some(pattern) = &self.drop_pattern {
            if pattern.is_match(record.message()) {
                return Ok(None);
            }
        }
        Ok(Some(record))
    }
}

/// Attaches static attributes plus an `ingested_at_ms` stamp.
#[derive(Debug, Default)]
pub struct EnrichRule {
    static_attrs: Attributes,
}

impl EnrichRule {
    pub fn new(static_attrs: Attributes) -> Self {
        EnrichRule { static_attrs }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.static_attrs.insert(key.into(), value.into());
        self
    }
}

impl TransformRule for EnrichRule {
    fn apply(&self, record: LogRecord) -> Result<Option<LogRecord>, ParseFailure> {
        let mut attributes = record.attributes().clone();
        for (key, value) in &self.static_attrs {
            attributes.insert(key.clone(), value.clone());
        }
        attributes.insert("ingested_at_ms".to_string(), AttrValue::Int(now_ms()));
        Ok(Some(record.with_attributes(attributes)))
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

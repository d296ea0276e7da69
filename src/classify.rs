//! Line classifier.
//!
//! Maps one line of device text to a typed record. Detectors run in a fixed
//! priority order and the first success wins; there is no scoring and no
//! failure mode. A line nothing else claims is `Raw`.
//!
//! Priority: JSON, CSV, key-value pairs, numeric array, scalar, raw.

use serde::{Deserialize, Serialize};

/// The closed set of record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Json,
    Csv,
    KeyValue,
    NumericArray,
    ScalarInt,
    ScalarFloat,
    Raw,
}

/// A coerced primitive value inside key-value or numeric-array payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Payload shape, determined by the record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordPayload {
    Json(serde_json::Value),
    Csv(Vec<String>),
    /// Ordered key to value mapping; insertion order is the line order.
    KeyValue(Vec<(String, ScalarValue)>),
    NumericArray(Vec<ScalarValue>),
    Int(i64),
    Float(f64),
    Raw(String),
}

/// Classify one line of text. Pure and total: always returns exactly one
/// kind, `Raw` in the worst case.
pub fn classify(line: &str) -> (RecordKind, RecordPayload) {
    let line = line.trim();

    if let Some(value) = try_json(line) {
        return (RecordKind::Json, RecordPayload::Json(value));
    }
    if let Some(fields) = try_csv(line) {
        return (RecordKind::Csv, RecordPayload::Csv(fields));
    }
    if let Some(pairs) = try_key_value(line) {
        return (RecordKind::KeyValue, RecordPayload::KeyValue(pairs));
    }
    if let Some(values) = try_numeric_array(line) {
        return (RecordKind::NumericArray, RecordPayload::NumericArray(values));
    }
    if let Ok(n) = line.parse::<i64>() {
        return (RecordKind::ScalarInt, RecordPayload::Int(n));
    }
    if let Ok(f) = line.parse::<f64>() {
        return (RecordKind::ScalarFloat, RecordPayload::Float(f));
    }
    (RecordKind::Raw, RecordPayload::Raw(line.to_string()))
}

/// Structured JSON only. Bare JSON scalars are left for the later detectors
/// so `23` ends up as a scalar record, not a one-number JSON document.
fn try_json(line: &str) -> Option<serde_json::Value> {
    if !(line.starts_with('{') || line.starts_with('[')) {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Quote-aware comma split into at least two fields.
///
/// Lines carrying an unquoted `:` or `=` are declined here so key-value
/// telemetry like `temp:23.5,humidity:45` reaches the key-value detector.
fn try_csv(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                // Doubled quote inside a quoted field is an escaped quote.
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            ':' | '=' if !in_quotes => return None,
            _ => field.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    fields.push(field);

    if fields.len() >= 2 {
        Some(fields.into_iter().map(|f| f.trim().to_string()).collect())
    } else {
        None
    }
}

/// `key:value` or `key=value` pairs delimited by `,` or `;`.
///
/// Requires at least one pair delimiter and every non-empty segment to carry
/// a separator; otherwise the line falls through.
fn try_key_value(line: &str) -> Option<Vec<(String, ScalarValue)>> {
    if !line.contains([':', '=']) || !line.contains([',', ';']) {
        return None;
    }

    let mut pairs = Vec::new();
    for segment in line.split([',', ';']) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let split_at = segment.find([':', '='])?;
        let key = segment[..split_at].trim();
        let value = segment[split_at + 1..].trim();
        if key.is_empty() {
            return None;
        }
        pairs.push((key.to_string(), coerce_value(value)));
    }

    if pairs.is_empty() {
        None
    } else {
        Some(pairs)
    }
}

/// At least two whitespace tokens, all numeric.
fn try_numeric_array(line: &str) -> Option<Vec<ScalarValue>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }
    tokens.iter().map(|t| parse_number(t)).collect()
}

fn parse_number(token: &str) -> Option<ScalarValue> {
    if let Ok(n) = token.parse::<i64>() {
        return Some(ScalarValue::Int(n));
    }
    token.parse::<f64>().ok().map(ScalarValue::Float)
}

/// Coerce a key-value string: booleans, then integers, then floats, then
/// plain text.
fn coerce_value(value: &str) -> ScalarValue {
    if value.eq_ignore_ascii_case("true") {
        return ScalarValue::Bool(true);
    }
    if value.eq_ignore_ascii_case("false") {
        return ScalarValue::Bool(false);
    }
    match parse_number(value) {
        Some(n) => n,
        None => ScalarValue::Text(value.to_string()),
    }
}

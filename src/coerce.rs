//! Input coercion: raw, form-submitted values into the semantic type each
//! field declares.
//!
//! Coercion never fails. Worst case a field falls back to its type's zero
//! value, which keeps the executor tolerant of malformed client input by
//! construction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};

use crate::config::{InputField, InputType};

/// Convert raw input values into the types declared by `defs`.
///
/// With no field definitions the raw inputs pass through unchanged (legacy
/// apps whose inputs were inferred from code).
pub fn coerce_inputs(raw: &Map<String, Value>, defs: &[InputField]) -> Map<String, Value> {
    if defs.is_empty() {
        return raw.clone();
    }

    let mut coerced = Map::new();
    for field in defs {
        let value = match raw.get(&field.id) {
            None | Some(Value::Null) => missing_value(field),
            Some(Value::String(s)) if s.is_empty() => missing_value(field),
            Some(present) => coerce_value(present, field.field_type),
        };
        coerced.insert(field.id.clone(), value);
    }
    coerced
}

fn missing_value(field: &InputField) -> Value {
    field
        .default_value
        .clone()
        .unwrap_or_else(|| field.field_type.zero_value())
}

fn coerce_value(value: &Value, field_type: InputType) -> Value {
    match field_type {
        InputType::Number | InputType::Range => Value::from(to_number(value)),
        InputType::Checkbox => Value::Bool(to_bool(value)),
        InputType::Date => parse_date(value),
        InputType::Datetime => parse_datetime(value),
        InputType::Time => parse_time(value),
        InputType::Multiselect => to_list(value),
        _ => Value::String(to_text(value)),
    }
}

/// Invalid parses become 0, never an error.
fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

/// Checkboxes accept boolean true and the literal strings "true"/"on".
fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim(), "true" | "on"),
        _ => false,
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Arrays pass through; comma-separated strings split and trim.
fn to_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        Value::String(s) => Value::Array(
            s.split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                .collect(),
        ),
        other => Value::Array(vec![other.clone()]),
    }
}

/// Dates normalize to `YYYY-MM-DD`; unparseable input becomes null.
fn parse_date(value: &Value) -> Value {
    let Some(s) = value.as_str() else {
        return Value::Null;
    };
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Value::String(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Value::String(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    Value::Null
}

/// Datetimes normalize to RFC 3339; unparseable input becomes null.
fn parse_datetime(value: &Value) -> Value {
    let Some(s) = value.as_str() else {
        return Value::Null;
    };
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Value::String(dt.to_rfc3339());
    }
    // Browser datetime-local widgets submit without an offset.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Value::String(naive.format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Value::String(naive.format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    Value::Null
}

/// Times normalize to `HH:MM:SS`; unparseable input becomes null.
fn parse_time(value: &Value) -> Value {
    let Some(s) = value.as_str() else {
        return Value::Null;
    };
    let s = s.trim();
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return Value::String(time.format("%H:%M:%S").to_string());
        }
    }
    Value::Null
}

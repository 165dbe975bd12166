//! Raw value to typed value conversion, one rule per field kind
//!
//! `Ok(None)` means the field is left out of the record entirely, which
//! is how unparsable numbers and auto-managed timestamps are handled.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::ResolveError;
use crate::geometry::Geometry;
use crate::schema::{FieldDefinition, FieldKind};
use crate::value::{RawValue, Value};

const TRUE_TOKENS: [&str; 4] = ["1", "true", "True", "t"];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Coerce `raw` for `field` of `entity`
pub fn coerce_field(
    entity: &str,
    field: &FieldDefinition,
    raw: &RawValue,
) -> Result<Option<Value>, ResolveError> {
    match &field.kind {
        FieldKind::Text { max_length } => Ok(Some(coerce_text(raw, *max_length))),
        FieldKind::Boolean => Ok(Some(Value::Boolean(coerce_bool(raw)))),
        FieldKind::Integer => Ok(coerce_integer(raw).map(Value::Integer)),
        FieldKind::Float => Ok(coerce_float(raw).map(Value::Float)),
        FieldKind::Timestamp { .. } => coerce_timestamp(entity, field, raw),
        FieldKind::Spatial { dimensions } => coerce_spatial(entity, field, *dimensions, raw),
        FieldKind::Reference { target } => coerce_reference(entity, field, target, raw),
    }
}

fn coerce_text(raw: &RawValue, max_length: Option<usize>) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    let text = match raw {
        // Spelled so the text reads back as the same boolean
        RawValue::Boolean(true) => "True".to_string(),
        RawValue::Boolean(false) => "False".to_string(),
        other => other.to_string(),
    };
    match max_length {
        Some(max) if text.chars().count() > max => Value::Text(text.chars().take(max).collect()),
        _ => Value::Text(text),
    }
}

fn coerce_bool(raw: &RawValue) -> bool {
    match raw {
        RawValue::Boolean(b) => *b,
        RawValue::Integer(i) => *i == 1,
        RawValue::Float(f) => *f == 1.0,
        RawValue::Text(s) => TRUE_TOKENS.contains(&s.as_str()),
        _ => false,
    }
}

fn coerce_integer(raw: &RawValue) -> Option<i64> {
    match raw {
        RawValue::Integer(i) => Some(*i),
        RawValue::Float(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Some(f.trunc() as i64),
        RawValue::Boolean(b) => Some(i64::from(*b)),
        RawValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(raw: &RawValue) -> Option<f64> {
    match raw {
        RawValue::Float(f) => Some(*f),
        RawValue::Integer(i) => Some(*i as f64),
        RawValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        RawValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a timestamp in one of the accepted layouts; naive values are UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

fn coerce_timestamp(
    entity: &str,
    field: &FieldDefinition,
    raw: &RawValue,
) -> Result<Option<Value>, ResolveError> {
    if field.auto_timestamp().is_some() {
        return Ok(None);
    }
    if raw.is_blank() {
        return if field.nullable {
            Ok(Some(Value::Null))
        } else {
            Err(ResolveError::invalid_value(entity, &field.name, "a timestamp is required"))
        };
    }
    match parse_timestamp(&raw.to_string()) {
        Some(ts) => Ok(Some(Value::Timestamp(ts))),
        None if field.nullable => Ok(Some(Value::Null)),
        None => Err(ResolveError::invalid_value(
            entity,
            &field.name,
            format!("'{}' is not a recognised timestamp", raw),
        )),
    }
}

fn coerce_spatial(
    entity: &str,
    field: &FieldDefinition,
    dimensions: u8,
    raw: &RawValue,
) -> Result<Option<Value>, ResolveError> {
    let text = match raw {
        RawValue::Null => return Ok(Some(Value::Null)),
        RawValue::Text(s) if s.trim().is_empty() => return Ok(Some(Value::Null)),
        RawValue::Text(s) => s,
        other => {
            return Err(ResolveError::invalid_value(
                entity,
                &field.name,
                format!("expected well-known text, got {}", other),
            ))
        }
    };
    let geometry = Geometry::parse(text)
        .map_err(|err| ResolveError::invalid_value(entity, &field.name, err.to_string()))?;
    let geometry = if dimensions < 3 && geometry.has_z() {
        geometry.force_2d()
    } else {
        geometry
    };
    Ok(Some(Value::Spatial(geometry)))
}

fn coerce_reference(
    entity: &str,
    field: &FieldDefinition,
    target: &str,
    raw: &RawValue,
) -> Result<Option<Value>, ResolveError> {
    match raw {
        RawValue::Ref(row) if row.entity == target => Ok(Some(Value::Ref(row.clone()))),
        RawValue::Ref(row) => Err(ResolveError::invalid_value(
            entity,
            &field.name,
            format!("{} is not a {}", row, target),
        )),
        RawValue::Null if field.nullable => Ok(Some(Value::Null)),
        RawValue::Null => Err(ResolveError::invalid_value(
            entity,
            &field.name,
            "a reference is required",
        )),
        _ => Err(ResolveError::unsupported(
            entity,
            format!("'{}' must be resolved before coercion", field.name),
        )),
    }
}

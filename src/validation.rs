//! Validation of extracted candidate records.
//!
//! Pure functions, no I/O. Every check fails closed: anything unexpected is a
//! rejection with a reason, never a best-effort coercion.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::models::{CandidateRecord, Category, MetricValue, Metrics, Mood, NewEntry};

pub const MAX_NOTE_CHARS: usize = 500;

/// Largest magnitude accepted for any numeric metric.
pub const MAX_METRIC_VALUE: f64 = 1_000_000.0;

static TIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").unwrap());

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Input is empty")]
    EmptyInput,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown category: {0:?}")]
    UnknownCategory(String),

    #[error("Unknown mood: {0:?}")]
    UnknownMood(String),

    #[error("Malformed date: {0:?} (expected YYYY-MM-DD)")]
    MalformedDate(String),

    #[error("Malformed time: {0:?} (expected HH:MM)")]
    MalformedTime(String),

    #[error("Metrics must be an object of key/value pairs")]
    MetricsNotObject,

    #[error("Metric {key} must be {expected}, got {found}")]
    MetricType {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("Metric {key} is not tracked for {category}")]
    MetricNotAllowed { category: Category, key: String },

    #[error("Metric {key} must not be negative (got {value})")]
    NegativeMetric { key: String, value: f64 },

    #[error("Metric {key} is out of range (got {value}, limit {max})")]
    MetricOutOfRange { key: String, value: f64, max: f64 },
}

/// Expected shape of a known metric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Finite, non-negative number.
    Quantity,
    /// `HH:MM` clock string.
    Clock,
}

/// Allowed metric keys per category. `None` means any key (number or string).
pub fn allowed_metrics(category: Category) -> Option<&'static [(&'static str, MetricKind)]> {
    use MetricKind::*;
    match category {
        Category::Exercise => Some(&[
            ("distance_km", Quantity),
            ("distance_m", Quantity),
            ("duration_min", Quantity),
            ("duration_hr", Quantity),
            ("count", Quantity),
            ("steps", Quantity),
            ("calories", Quantity),
        ]),
        Category::Study => Some(&[
            ("duration_min", Quantity),
            ("duration_hr", Quantity),
            ("pages", Quantity),
            ("count", Quantity),
            ("courses", Quantity),
            ("words", Quantity),
        ]),
        Category::Sleep => Some(&[
            ("sleep_hours", Quantity),
            ("duration_hr", Quantity),
            ("quality", Quantity),
            ("wake_time", Clock),
            ("bedtime", Clock),
        ]),
        Category::Emotion => Some(&[("score", Quantity), ("intensity", Quantity)]),
        Category::Diet => Some(&[
            ("calories", Quantity),
            ("meals", Quantity),
            ("water_ml", Quantity),
            ("glasses", Quantity),
        ]),
        Category::Other => None,
    }
}

pub fn validate_category(value: &str) -> Result<Category, ValidationError> {
    Category::from_str(value.trim()).map_err(|_| ValidationError::UnknownCategory(value.into()))
}

pub fn validate_mood(value: &str) -> Result<Mood, ValidationError> {
    Mood::from_str(value.trim()).map_err(|_| ValidationError::UnknownMood(value.into()))
}

pub fn validate_date(value: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = value.trim();
    // chrono accepts single-digit fields; the stored format does not.
    if trimmed.len() != 10 {
        return Err(ValidationError::MalformedDate(value.into()));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ValidationError::MalformedDate(value.into()))
}

pub fn validate_time(value: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = value.trim();
    if !TIME_PATTERN.is_match(trimmed) {
        return Err(ValidationError::MalformedTime(value.into()));
    }
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map_err(|_| ValidationError::MalformedTime(value.into()))
}

/// Check the metrics payload against the category's rules and convert it.
pub fn validate_metrics(category: Category, metrics: &Value) -> Result<Metrics, ValidationError> {
    let object = metrics.as_object().ok_or(ValidationError::MetricsNotObject)?;
    let rules = allowed_metrics(category);

    let mut validated = Metrics::new();
    for (key, value) in object {
        let kind = match rules {
            Some(rules) => Some(
                rules
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, kind)| *kind)
                    .ok_or_else(|| ValidationError::MetricNotAllowed {
                        category,
                        key: key.clone(),
                    })?,
            ),
            None => None,
        };
        validated.insert(key.clone(), validate_metric_value(key, value, kind)?);
    }
    Ok(validated)
}

fn validate_metric_value(
    key: &str,
    value: &Value,
    kind: Option<MetricKind>,
) -> Result<MetricValue, ValidationError> {
    let type_error = |expected: &'static str| ValidationError::MetricType {
        key: key.into(),
        expected,
        found: json_type_name(value).into(),
    };

    let in_range = |n: f64| {
        if n.abs() > MAX_METRIC_VALUE {
            Err(ValidationError::MetricOutOfRange {
                key: key.into(),
                value: n,
                max: MAX_METRIC_VALUE,
            })
        } else {
            Ok(n)
        }
    };

    match (kind, value) {
        (Some(MetricKind::Quantity), Value::Number(n)) => {
            let n = n
                .as_f64()
                .filter(|n| n.is_finite())
                .ok_or_else(|| type_error("a finite number"))
                .and_then(in_range)?;
            if n < 0.0 {
                return Err(ValidationError::NegativeMetric {
                    key: key.into(),
                    value: n,
                });
            }
            Ok(MetricValue::Number(n))
        }
        (Some(MetricKind::Quantity), _) => Err(type_error("a number")),
        (Some(MetricKind::Clock), Value::String(s)) => {
            validate_time(s)?;
            Ok(MetricValue::Text(s.trim().to_string()))
        }
        (Some(MetricKind::Clock), _) => Err(type_error("an HH:MM string")),
        (None, Value::Number(n)) => n
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| type_error("a finite number"))
            .and_then(in_range)
            .map(MetricValue::Number),
        (None, Value::String(s)) => Ok(MetricValue::Text(s.clone())),
        (None, _) => Err(type_error("a number or string")),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Collapse internal whitespace and cap the length. Empty notes become `None`.
pub fn sanitize_note(note: &str) -> Option<String> {
    let collapsed = note.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || collapsed.eq_ignore_ascii_case("null") {
        return None;
    }
    if collapsed.chars().count() <= MAX_NOTE_CHARS {
        return Some(collapsed);
    }
    let truncated: String = collapsed.chars().take(MAX_NOTE_CHARS - 3).collect();
    Some(format!("{truncated}..."))
}

/// Validate a full candidate and turn it into an entry ready for storage.
///
/// Missing date or time fall back to `reference` (normally "now").
pub fn validate_candidate(
    candidate: &CandidateRecord,
    reference: NaiveDateTime,
) -> Result<NewEntry, ValidationError> {
    let raw_input = candidate.raw_input.trim();
    if raw_input.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    let category = validate_category(
        candidate
            .category
            .as_deref()
            .ok_or(ValidationError::MissingField("category"))?,
    )?;
    let mood = validate_mood(
        candidate
            .mood
            .as_deref()
            .ok_or(ValidationError::MissingField("mood"))?,
    )?;
    let metrics = validate_metrics(
        category,
        candidate
            .metrics
            .as_ref()
            .ok_or(ValidationError::MissingField("metrics"))?,
    )?;

    let date = match candidate.date.as_deref() {
        Some(d) => validate_date(d)?,
        None => reference.date(),
    };
    let time = match candidate.time.as_deref() {
        Some(t) => validate_time(t)?,
        None => reference.time(),
    };

    Ok(NewEntry {
        timestamp: date.and_time(time),
        raw_input: raw_input.to_string(),
        category,
        mood,
        metrics,
        note: candidate.note.as_deref().and_then(sanitize_note),
    })
}

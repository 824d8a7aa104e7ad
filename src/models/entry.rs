use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::enums::{Category, Mood};

/// A single metric reading. Stored in the JSON payload as a bare number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Metric key → value. Ordered so the serialized payload is stable.
pub type Metrics = BTreeMap<String, MetricValue>;

/// A stored habit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
    pub raw_input: String,
    pub category: Category,
    pub mood: Mood,
    pub metrics: Metrics,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

/// An entry that passed validation and has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub timestamp: NaiveDateTime,
    pub raw_input: String,
    pub category: Category,
    pub mood: Mood,
    pub metrics: Metrics,
    pub note: Option<String>,
}

impl NewEntry {
    /// Calendar date, always derived from the timestamp.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Aggregate counts over a window of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryStatistics {
    pub total_entries: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub by_mood: BTreeMap<Mood, usize>,
}

impl EntryStatistics {
    pub fn positive_rate(&self) -> f64 {
        if self.total_entries == 0 {
            return 0.0;
        }
        *self.by_mood.get(&Mood::Positive).unwrap_or(&0) as f64 / self.total_entries as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_value_untagged_serde() {
        let metrics: Metrics =
            serde_json::from_str(r#"{"distance_km": 5.0, "wake_time": "06:30"}"#).unwrap();
        assert_eq!(metrics["distance_km"], MetricValue::Number(5.0));
        assert_eq!(metrics["wake_time"], MetricValue::Text("06:30".into()));
    }

    #[test]
    fn metric_value_display_trims_whole_numbers() {
        assert_eq!(MetricValue::Number(5.0).to_string(), "5");
        assert_eq!(MetricValue::Number(7.5).to_string(), "7.5");
        assert_eq!(MetricValue::Text("06:30".into()).to_string(), "06:30");
    }

    #[test]
    fn positive_rate_handles_empty() {
        assert_eq!(EntryStatistics::default().positive_rate(), 0.0);
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unvalidated record as produced by extraction. Every field the model may
/// omit or mistype stays loose here; the validator decides what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default)]
    pub raw_input: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl CandidateRecord {
    /// Names of required fields that are absent or null.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.category.is_none() {
            missing.push("category");
        }
        if self.mood.is_none() {
            missing.push("mood");
        }
        if self.metrics.is_none() {
            missing.push("metrics");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_json() {
        let candidate: CandidateRecord =
            serde_json::from_str(r#"{"category": "exercise", "note": null}"#).unwrap();
        assert_eq!(candidate.category.as_deref(), Some("exercise"));
        assert_eq!(candidate.missing_fields(), vec!["mood", "metrics"]);
    }

    #[test]
    fn null_metrics_count_as_missing() {
        let candidate: CandidateRecord =
            serde_json::from_str(r#"{"category": "study", "mood": "neutral", "metrics": null}"#)
                .unwrap();
        assert_eq!(candidate.missing_fields(), vec!["metrics"]);
    }
}

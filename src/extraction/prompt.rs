use chrono::NaiveDate;
use serde_json::Value;

use crate::models::{Category, Mood};
use crate::validation::allowed_metrics;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a habit-tracking assistant. \
Turn the user's statement into one structured JSON record. \
Return ONLY the JSON object, with no commentary.";

/// One field the model is asked to fill.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: String,
    pub required: bool,
    pub allowed: Vec<&'static str>,
}

/// Target shape of an extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSchema {
    pub fields: Vec<FieldSpec>,
}

impl ExtractionSchema {
    /// The habit-entry schema used by recording.
    pub fn habit_entry() -> Self {
        let metric_hints = Category::ALL
            .iter()
            .filter_map(|c| {
                allowed_metrics(*c).map(|rules| {
                    let keys: Vec<&str> = rules.iter().map(|(k, _)| *k).collect();
                    format!("{c}: {}", keys.join(", "))
                })
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            fields: vec![
                FieldSpec {
                    name: "category",
                    description: "the single best-matching habit category".into(),
                    required: true,
                    allowed: Category::ALL.iter().map(|c| c.as_str()).collect(),
                },
                FieldSpec {
                    name: "mood",
                    description: "positive or negative only when the text states a feeling; otherwise neutral".into(),
                    required: true,
                    allowed: Mood::ALL.iter().map(|m| m.as_str()).collect(),
                },
                FieldSpec {
                    name: "metrics",
                    description: format!(
                        "object of numeric readings using these keys ({metric_hints}); times as HH:MM strings; other may use any descriptive key; {{}} when none"
                    ),
                    required: true,
                    allowed: Vec::new(),
                },
                FieldSpec {
                    name: "note",
                    description: "short extra remark, or null".into(),
                    required: false,
                    allowed: Vec::new(),
                },
                FieldSpec {
                    name: "date",
                    description: "YYYY-MM-DD only if the text names a day other than today, else null".into(),
                    required: false,
                    allowed: Vec::new(),
                },
                FieldSpec {
                    name: "time",
                    description: "HH:MM only if the text names a time of day, else null".into(),
                    required: false,
                    allowed: Vec::new(),
                },
            ],
        }
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Check a parsed response has every required field, non-null.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| "response is not a JSON object".to_string())?;
        let missing: Vec<&str> = self
            .required_fields()
            .filter(|name| object.get(*name).map_or(true, Value::is_null))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required fields: {}", missing.join(", ")))
        }
    }

    fn render(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let requirement = if f.required { "required" } else { "optional" };
                if f.allowed.is_empty() {
                    format!("- \"{}\" ({requirement}): {}", f.name, f.description)
                } else {
                    format!(
                        "- \"{}\" ({requirement}): one of {}; {}",
                        f.name,
                        f.allowed.join(" | "),
                        f.description
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// First-turn prompt for an extraction.
pub fn build_extraction_prompt(input: &str, schema: &ExtractionSchema, today: NaiveDate) -> String {
    format!(
        "Today is {today} ({weekday}).\n\n\
         Fields:\n{fields}\n\n\
         Rules:\n\
         - If several activities are mentioned, extract only the main one.\n\
         - Use the metric keys listed; convert units to match the key name.\n\n\
         Examples:\n\
         Input: \"ran 5km today, felt great\"\n\
         Output: {{\"category\": \"exercise\", \"mood\": \"positive\", \"metrics\": {{\"distance_km\": 5.0}}, \"note\": null, \"date\": null, \"time\": null}}\n\
         Input: \"read 50 pages before bed\"\n\
         Output: {{\"category\": \"study\", \"mood\": \"neutral\", \"metrics\": {{\"pages\": 50}}, \"note\": null, \"date\": null, \"time\": null}}\n\
         Input: \"woke up at 6:30 after 7.5 hours, exhausted\"\n\
         Output: {{\"category\": \"sleep\", \"mood\": \"negative\", \"metrics\": {{\"wake_time\": \"06:30\", \"sleep_hours\": 7.5}}, \"note\": null, \"date\": null, \"time\": null}}\n\n\
         Input: \"{input}\"\n\
         Output:",
        weekday = today.format("%A"),
        fields = schema.render(),
        input = input.replace('"', "'"),
    )
}

/// Follow-up turn after an unusable response.
pub fn build_correction_prompt(problem: &str, schema: &ExtractionSchema) -> String {
    let required: Vec<&str> = schema.required_fields().collect();
    format!(
        "That response could not be used: {problem}. \
         Reply again with ONLY a JSON object containing at least {}.",
        required.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn habit_schema_requires_core_fields() {
        let schema = ExtractionSchema::habit_entry();
        let required: Vec<_> = schema.required_fields().collect();
        assert_eq!(required, vec!["category", "mood", "metrics"]);
    }

    #[test]
    fn check_reports_missing_and_null_fields() {
        let schema = ExtractionSchema::habit_entry();
        assert!(schema.check(&json!({"category": "study", "mood": "neutral", "metrics": {}})).is_ok());

        let err = schema.check(&json!({"category": "study", "mood": null})).unwrap_err();
        assert!(err.contains("mood"));
        assert!(err.contains("metrics"));

        assert!(schema.check(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn prompt_lists_allowed_values_and_date() {
        let prompt = build_extraction_prompt("ran 5km", &ExtractionSchema::habit_entry(), today());
        assert!(prompt.contains("Today is 2024-03-04 (Monday)"));
        assert!(prompt.contains("exercise | study | sleep | emotion | diet | other"));
        assert!(prompt.contains("positive | neutral | negative"));
        assert!(prompt.contains("distance_km"));
        assert!(prompt.ends_with("Input: \"ran 5km\"\nOutput:"));
    }

    #[test]
    fn correction_prompt_names_problem() {
        let prompt = build_correction_prompt("missing required fields: mood", &ExtractionSchema::habit_entry());
        assert!(prompt.contains("missing required fields: mood"));
        assert!(prompt.contains("category, mood, metrics"));
    }
}

//! Query intent classification: LLM first, keyword rules as fallback.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::llm::{CompletionApi, CompletionRequest, LlmError, Operation};
use crate::models::Category;

const CLASSIFICATION_SYSTEM_PROMPT: &str = "You classify questions about a personal habit log. \
Return ONLY a JSON object.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Record,
    Count,
    Last,
    Summary,
    Comparison,
    Report,
    General,
}

impl Intent {
    pub const ALL: &'static [Intent] = &[
        Intent::Record,
        Intent::Count,
        Intent::Last,
        Intent::Summary,
        Intent::Comparison,
        Intent::Report,
        Intent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "RECORD",
            Self::Count => "COUNT",
            Self::Last => "LAST",
            Self::Summary => "SUMMARY",
            Self::Comparison => "COMPARISON",
            Self::Report => "REPORT",
            Self::General => "GENERAL",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Today,
    Week,
    Month,
}

impl Timeframe {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "today" | "day" => Some(Self::Today),
            "week" | "this week" => Some(Self::Week),
            "month" | "this month" => Some(Self::Month),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntentEntities {
    pub category: Option<Category>,
    pub timeframe: Option<Timeframe>,
    pub specific_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Llm,
    Rules,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub entities: IntentEntities,
    pub source: ClassificationSource,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    entities: RawEntities,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    timeframe: Option<String>,
    #[serde(default)]
    specific_date: Option<String>,
}

pub struct IntentClassifier {
    llm: Arc<dyn CompletionApi>,
    model: String,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn CompletionApi>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Never fails: any LLM problem falls back to [`classify_by_rules`].
    pub fn classify(&self, query: &str) -> Classification {
        match self.classify_with_llm(query) {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(error = %e, "Intent classification fell back to keyword rules");
                classify_by_rules(query)
            }
        }
    }

    fn classify_with_llm(&self, query: &str) -> Result<Classification, LlmError> {
        let request = CompletionRequest::new(
            Operation::Classify,
            self.model.as_str(),
            CLASSIFICATION_SYSTEM_PROMPT,
            build_classification_prompt(query),
        )
        .with_max_tokens(200);
        let raw: RawClassification = self.llm.complete(&request)?.json()?;

        let intent = Intent::parse(&raw.intent)
            .ok_or_else(|| LlmError::ResponseParsing(format!("unknown intent '{}'", raw.intent)))?;
        let entities = IntentEntities {
            category: raw.entities.category.and_then(|c| c.trim().to_lowercase().parse().ok()),
            timeframe: raw.entities.timeframe.as_deref().and_then(Timeframe::parse),
            specific_date: raw
                .entities
                .specific_date
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
        };

        Ok(Classification {
            intent,
            entities,
            source: ClassificationSource::Llm,
        })
    }
}

fn build_classification_prompt(query: &str) -> String {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    format!(
        "Intents:\n\
         - RECORD: the user reports something they did or felt\n\
         - COUNT: how many times / how often\n\
         - LAST: when something last happened\n\
         - SUMMARY: overview of a period\n\
         - COMPARISON: compare two periods\n\
         - REPORT: asks for the weekly report\n\
         - GENERAL: anything else\n\n\
         Entities (null when absent): category ({categories}), \
         timeframe (today | week | month), specific_date (YYYY-MM-DD).\n\n\
         Reply as {{\"intent\": \"...\", \"entities\": {{\"category\": null, \"timeframe\": null, \"specific_date\": null}}}}\n\n\
         Question: \"{query}\"",
        categories = categories.join(", "),
        query = query.replace('"', "'"),
    )
}

const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Exercise, &["run", "ran", "jog", "gym", "workout", "exercise", "swim", "walk", "bike", "yoga"]),
    (Category::Study, &["study", "studied", "read", "book", "learn", "course", "lecture"]),
    (Category::Sleep, &["sleep", "slept", "woke", "wake", "bed", "nap"]),
    (Category::Emotion, &["mood", "feel", "felt", "emotion", "stress", "anxious", "happy"]),
    (Category::Diet, &["eat", "ate", "meal", "food", "diet", "water", "calorie", "drink"]),
];

/// Keyword classification. Order matters: comparison, last, count, report,
/// summary, then a statement without a question mark is a record.
pub fn classify_by_rules(query: &str) -> Classification {
    let q = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| q.contains(w));

    let intent = if has(&["compare", " vs ", "versus", "than last", "compared"]) {
        Intent::Comparison
    } else if has(&["last time", "when did i last", "most recent", "latest"]) {
        Intent::Last
    } else if has(&["how many", "how often", "how much", "count", "number of"]) {
        Intent::Count
    } else if has(&["report"]) {
        Intent::Report
    } else if has(&["summary", "summarize", "summarise", "overview", "how was", "how am i doing", "stats"]) {
        Intent::Summary
    } else if !q.contains('?') && matched_category(&q).is_some() {
        Intent::Record
    } else {
        Intent::General
    };

    let timeframe = if q.contains("today") {
        Some(Timeframe::Today)
    } else if q.contains("month") {
        Some(Timeframe::Month)
    } else if q.contains("week") {
        Some(Timeframe::Week)
    } else {
        None
    };

    Classification {
        intent,
        entities: IntentEntities {
            category: matched_category(&q),
            timeframe,
            specific_date: find_iso_date(&q),
        },
        source: ClassificationSource::Rules,
    }
}

pub(crate) fn matched_category(lowercase_query: &str) -> Option<Category> {
    let words: Vec<&str> = lowercase_query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    CATEGORY_KEYWORDS.iter().find_map(|(category, keywords)| {
        words
            .iter()
            .any(|w| keywords.iter().any(|k| w.starts_with(k)))
            .then_some(*category)
    })
}

fn find_iso_date(text: &str) -> Option<NaiveDate> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_digit()))
        .find_map(|w| NaiveDate::parse_from_str(w, "%Y-%m-%d").ok())
}

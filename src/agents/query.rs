use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;

use super::{Agent, AgentError};
use crate::analysis::time_series::saturate;
use crate::analysis::Analyzer;
use crate::db::EntryFilter;
use crate::extraction::{Classification, Intent, IntentClassifier, Timeframe};
use crate::models::{Category, Entry, Mood, WeekId};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub text: String,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub classification: Classification,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub response: String,
    pub data: serde_json::Value,
}

/// Response text plus the figures behind it.
type Answer = (String, serde_json::Value);

/// Answers questions about the log: classify, resolve the window, then read.
pub struct QueryAgent {
    classifier: IntentClassifier,
    analyzer: Analyzer,
}

impl QueryAgent {
    pub fn new(classifier: IntentClassifier, analyzer: Analyzer) -> Self {
        Self {
            classifier,
            analyzer,
        }
    }

    fn count(&self, filter: &EntryFilter, label: &str) -> Result<Answer, AgentError> {
        let entries = self.analyzer.repository().entries_between(filter)?;
        let sums = metric_sums(&entries);
        let what = filter.category.map_or("entries".to_string(), |c| format!("{c} entries"));
        let mut response = format!("You logged {} {what} {label}.", entries.len());
        if !sums.is_empty() {
            let totals: Vec<String> = sums
                .iter()
                .map(|(k, v)| format!("{}: {}", k.replace('_', " "), trim_float(*v)))
                .collect();
            response.push_str(&format!(" Totals: {}.", totals.join(", ")));
        }
        Ok((response, json!({ "count": entries.len(), "metric_sums": sums })))
    }

    fn last(&self, category: Option<Category>, today: NaiveDate) -> Result<Answer, AgentError> {
        let recent = self.analyzer.repository().recent_entries(1, category)?;
        let what = category.map_or("entry".to_string(), |c| format!("{c} entry"));
        Ok(match recent.first() {
            None => (format!("No {what} recorded yet."), json!(null)),
            Some(entry) => {
                let days_ago = (today - entry.date).num_days();
                let when = match days_ago {
                    0 => "today".to_string(),
                    1 => "yesterday".to_string(),
                    n if n > 1 => format!("{n} days ago"),
                    _ => "in the future".to_string(),
                };
                (
                    format!(
                        "Your last {what} was on {} ({when}): \"{}\"",
                        entry.date, entry.raw_input
                    ),
                    json!(entry),
                )
            }
        })
    }

    fn summary(&self, filter: &EntryFilter, label: &str) -> Result<Answer, AgentError> {
        let stats = self.analyzer.repository().statistics(filter)?;
        if stats.total_entries == 0 {
            return Ok((format!("Nothing logged {label}."), json!(stats)));
        }
        let categories: Vec<String> = stats
            .by_category
            .iter()
            .map(|(c, n)| format!("{c} {n}"))
            .collect();
        let moods: Vec<String> = Mood::ALL
            .iter()
            .map(|m| format!("{} {}", stats.by_mood.get(m).copied().unwrap_or(0), m.emoji()))
            .collect();
        let response = format!(
            "{label}: {} entries ({}). Mood: {} ({:.0}% positive).",
            stats.total_entries,
            categories.join(", "),
            moods.join(", "),
            stats.positive_rate() * 100.0
        );
        Ok((capitalize(&response), json!(stats)))
    }

    fn comparison(&self, today: NaiveDate) -> Result<Answer, AgentError> {
        let current = WeekId::containing(today);
        let cmp = self.analyzer.compare_weeks(current.previous(), current)?;
        let change = &cmp.total_entries;
        let mut response = format!(
            "This week: {} entries, last week: {} ({:+}).",
            change.current, change.previous, change.absolute
        );
        let moved: Vec<String> = cmp
            .by_category
            .iter()
            .filter(|(_, c)| c.absolute != 0)
            .map(|(cat, c)| format!("{cat} {:+}", c.absolute))
            .collect();
        if !moved.is_empty() {
            response.push_str(&format!(" By category: {}.", moved.join(", ")));
        }
        Ok((response, json!(cmp)))
    }
}

impl Agent for QueryAgent {
    type Input = QueryRequest;
    type Output = QueryAnswer;

    fn name(&self) -> &'static str {
        "query"
    }

    fn execute(&self, input: QueryRequest) -> Result<QueryAnswer, AgentError> {
        let _span = tracing::info_span!("agent", agent = self.name()).entered();
        let classification = self.classifier.classify(&input.text);
        let entities = &classification.entities;
        let (start, end, label) =
            resolve_range(entities.timeframe, entities.specific_date, input.today);
        let filter = EntryFilter::between(start, end).with_category(entities.category);

        let (response, data) = match classification.intent {
            Intent::Count => self.count(&filter, &label)?,
            Intent::Last => self.last(entities.category, input.today)?,
            Intent::Summary => self.summary(&filter, &label)?,
            Intent::Comparison => self.comparison(input.today)?,
            Intent::Report => (
                "Run `trackit report` to see this week's report.".to_string(),
                json!(null),
            ),
            Intent::Record => (
                "That sounds like something to record. Use `trackit record \"...\"`.".to_string(),
                json!(null),
            ),
            Intent::General => (
                "Try asking \"how many times did I exercise this week?\", \
                 \"when did I last study?\" or \"compare this week with last week\"."
                    .to_string(),
                json!(null),
            ),
        };

        tracing::info!(intent = classification.intent.as_str(), %start, %end, "Query answered");
        Ok(QueryAnswer {
            classification,
            start,
            end,
            response,
            data,
        })
    }
}

/// Date window for a query, inclusive, plus a phrase describing it.
pub fn resolve_range(
    timeframe: Option<Timeframe>,
    specific_date: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate, String) {
    if let Some(date) = specific_date {
        return (date, date, format!("on {date}"));
    }
    match timeframe {
        Some(Timeframe::Today) => (today, today, "today".to_string()),
        Some(Timeframe::Week) => (WeekId::containing(today).monday(), today, "this week".to_string()),
        Some(Timeframe::Month) => (
            today.with_day(1).unwrap_or(today),
            today,
            "this month".to_string(),
        ),
        None => (today - Duration::days(6), today, "in the last 7 days".to_string()),
    }
}

fn metric_sums(entries: &[Entry]) -> BTreeMap<String, f64> {
    let mut sums = BTreeMap::new();
    for entry in entries {
        for (key, value) in &entry.metrics {
            if let Some(n) = value.as_number() {
                *sums.entry(key.clone()).or_insert(0.0) += n;
            }
        }
    }
    sums.values_mut().for_each(|sum| *sum = saturate(*sum));
    sums
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::seeded_analyzer;
    use crate::llm::mock::{MockLlmClient, SequenceLlmClient};
    use std::sync::Arc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Classifier whose LLM is down, so keyword rules decide.
    fn rules_agent(dir: &tempfile::TempDir) -> QueryAgent {
        let llm = Arc::new(SequenceLlmClient::new(vec![]));
        QueryAgent::new(IntentClassifier::new(llm, "m"), seeded_analyzer(dir))
    }

    fn ask(agent: &QueryAgent, text: &str, today: &str) -> QueryAnswer {
        agent
            .execute(QueryRequest {
                text: text.into(),
                today: date(today),
            })
            .unwrap()
    }

    #[test]
    fn resolves_timeframes() {
        let today = date("2024-03-07"); // Thursday
        assert_eq!(resolve_range(Some(Timeframe::Today), None, today).0, today);
        assert_eq!(resolve_range(Some(Timeframe::Week), None, today).0, date("2024-03-04"));
        assert_eq!(resolve_range(Some(Timeframe::Month), None, today).0, date("2024-03-01"));
        assert_eq!(resolve_range(None, None, today).0, date("2024-03-01"));
        let (start, end, label) = resolve_range(Some(Timeframe::Week), Some(date("2024-02-02")), today);
        assert_eq!((start, end), (date("2024-02-02"), date("2024-02-02")));
        assert_eq!(label, "on 2024-02-02");
    }

    #[test]
    fn count_sums_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let answer = ask(&rules_agent(&dir), "How many times did I exercise this week?", "2024-03-07");
        assert_eq!(answer.classification.intent, Intent::Count);
        assert_eq!(answer.data["count"], 2);
        assert_eq!(
            answer.response,
            "You logged 2 exercise entries this week. Totals: distance km: 11."
        );
    }

    #[test]
    fn last_reports_most_recent_entry() {
        let dir = tempfile::tempdir().unwrap();
        let answer = ask(&rules_agent(&dir), "when did I last go running?", "2024-03-07");
        assert_eq!(answer.classification.intent, Intent::Last);
        assert!(answer.response.starts_with("Your last exercise entry was on 2024-03-05 (2 days ago)"));
    }

    #[test]
    fn summary_reports_moods() {
        let dir = tempfile::tempdir().unwrap();
        let answer = ask(&rules_agent(&dir), "give me a summary of this week", "2024-03-07");
        assert_eq!(answer.classification.intent, Intent::Summary);
        assert!(answer.response.starts_with("This week: 3 entries"));
        assert!(answer.response.contains("67% positive"));
    }

    #[test]
    fn comparison_uses_iso_weeks() {
        let dir = tempfile::tempdir().unwrap();
        let answer = ask(&rules_agent(&dir), "compare this week vs last week", "2024-03-07");
        assert_eq!(answer.classification.intent, Intent::Comparison);
        assert!(answer.response.starts_with("This week: 3 entries, last week: 1 (+2)."));
    }

    #[test]
    fn llm_classification_drives_answer() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::new(
            r#"{"intent": "COUNT", "entities": {"category": "study", "timeframe": "month"}}"#,
        ));
        let agent = QueryAgent::new(IntentClassifier::new(llm, "m"), seeded_analyzer(&dir));
        let answer = ask(&agent, "studying this month?", "2024-03-07");
        assert_eq!(answer.start, date("2024-03-01"));
        assert_eq!(answer.response, "You logged 1 study entries this month.");
    }

    #[test]
    fn general_questions_get_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let answer = ask(&rules_agent(&dir), "what is the meaning of life?", "2024-03-07");
        assert_eq!(answer.classification.intent, Intent::General);
        assert!(answer.response.contains("how many times"));
    }
}

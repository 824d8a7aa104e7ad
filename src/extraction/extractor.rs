use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use super::cache::{cache_key, CacheStats, ExtractionCache};
use super::prompt::{
    build_correction_prompt, build_extraction_prompt, ExtractionSchema, EXTRACTION_SYSTEM_PROMPT,
};
use super::ExtractionError;
use crate::config::Settings;
use crate::llm::{parse_json_block, CompletionApi, CompletionRequest, Message, Operation};
use crate::models::CandidateRecord;

/// Result of one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub candidate: CandidateRecord,
    pub from_cache: bool,
    /// LLM calls made, corrections included. Zero on a cache hit.
    pub llm_calls: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub from_cache: usize,
    pub llm_calls: u32,
}

#[derive(Debug)]
pub struct BatchExtraction {
    /// One result per input, same order.
    pub results: Vec<Result<Extraction, ExtractionError>>,
    pub summary: BatchSummary,
}

/// Turns free text into a [`CandidateRecord`] with a corrective retry loop.
///
/// A response that is not JSON, or lacks a required field, is answered with a
/// follow-up turn naming the problem, up to `max_corrections` times. Transport
/// and provider errors are not corrected; they surface as [`ExtractionError::Llm`].
pub struct Extractor {
    llm: Arc<dyn CompletionApi>,
    model: String,
    schema: ExtractionSchema,
    max_corrections: u32,
    cache: Option<Mutex<ExtractionCache<CandidateRecord>>>,
}

impl Extractor {
    pub fn new(llm: Arc<dyn CompletionApi>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            schema: ExtractionSchema::habit_entry(),
            max_corrections: 2,
            cache: None,
        }
    }

    pub fn from_settings(llm: Arc<dyn CompletionApi>, settings: &Settings) -> Self {
        let extractor = Self::new(llm, settings.llm.extraction_model.clone())
            .with_max_corrections(settings.extraction.max_corrections);
        if settings.extraction.cache_enabled {
            extractor.with_cache(ExtractionCache::new(
                settings.extraction.cache_max_entries,
                Duration::from_secs(settings.extraction.cache_ttl_secs),
            ))
        } else {
            extractor
        }
    }

    pub fn with_max_corrections(mut self, max_corrections: u32) -> Self {
        self.max_corrections = max_corrections;
        self
    }

    pub fn with_cache(mut self, cache: ExtractionCache<CandidateRecord>) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Extract `text`, resolving relative dates against `today`.
    pub fn extract(&self, text: &str, today: NaiveDate) -> Result<Extraction, ExtractionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExtractionError::EmptyInput);
        }

        let key = cache_key(text, today);
        if let Some(mut candidate) = self.cached(&key) {
            tracing::debug!("Extraction cache hit");
            candidate.raw_input = text.to_string();
            return Ok(Extraction {
                candidate,
                from_cache: true,
                llm_calls: 0,
            });
        }

        let (mut candidate, llm_calls) = self.extract_with_corrections(text, today)?;
        candidate.raw_input = text.to_string();
        self.store(key, &candidate);

        Ok(Extraction {
            candidate,
            from_cache: false,
            llm_calls,
        })
    }

    /// Extract several inputs independently. One failure does not stop the rest.
    pub fn extract_batch<S: AsRef<str>>(&self, texts: &[S], today: NaiveDate) -> BatchExtraction {
        let mut summary = BatchSummary {
            total: texts.len(),
            ..BatchSummary::default()
        };
        let results: Vec<_> = texts
            .iter()
            .map(|text| {
                let result = self.extract(text.as_ref(), today);
                match &result {
                    Ok(extraction) => {
                        summary.succeeded += 1;
                        summary.llm_calls += extraction.llm_calls;
                        if extraction.from_cache {
                            summary.from_cache += 1;
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(error = %e, "Batch item failed to extract");
                    }
                }
                result
            })
            .collect();

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            from_cache = summary.from_cache,
            "Batch extraction complete"
        );
        BatchExtraction { results, summary }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).stats())
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    /// Purge expired cache entries. Returns how many were removed.
    pub fn cleanup_cache(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| {
            c.lock().unwrap_or_else(|e| e.into_inner()).cleanup_expired()
        })
    }

    fn extract_with_corrections(
        &self,
        text: &str,
        today: NaiveDate,
    ) -> Result<(CandidateRecord, u32), ExtractionError> {
        let attempts = self.max_corrections + 1;
        let mut request = CompletionRequest::new(
            Operation::Extract,
            self.model.as_str(),
            EXTRACTION_SYSTEM_PROMPT,
            build_extraction_prompt(text, &self.schema, today),
        );
        let mut last_problem = String::new();

        for attempt in 1..=attempts {
            let completion = self.llm.complete(&request)?;
            match self.parse_candidate(&completion.text) {
                Ok(candidate) => return Ok((candidate, attempt)),
                Err(problem) => {
                    tracing::warn!(attempt, problem = %problem, "Extraction response unusable");
                    if attempt < attempts {
                        request.messages.push(Message::assistant(completion.text));
                        request
                            .messages
                            .push(Message::user(build_correction_prompt(&problem, &self.schema)));
                    }
                    last_problem = problem;
                }
            }
        }

        Err(ExtractionError::MalformedResponse {
            attempts,
            reason: last_problem,
        })
    }

    fn parse_candidate(&self, response: &str) -> Result<CandidateRecord, String> {
        let value: Value = parse_json_block(response).map_err(|e| e.to_string())?;
        self.schema.check(&value)?;
        serde_json::from_value(value).map_err(|e| format!("fields have the wrong type: {e}"))
    }

    fn cached(&self, key: &str) -> Option<CandidateRecord> {
        self.cache
            .as_ref()?
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
    }

    fn store(&self, key: String, candidate: &CandidateRecord) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, candidate.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlmClient, SequenceLlmClient};
    use crate::llm::{LlmError, Role};

    const RUN: &str = r#"{"category": "exercise", "mood": "positive", "metrics": {"distance_km": 5}, "note": null}"#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn cache() -> ExtractionCache<CandidateRecord> {
        ExtractionCache::new(16, Duration::from_secs(3600))
    }

    #[test]
    fn extracts_on_first_try() {
        let llm = Arc::new(MockLlmClient::new(RUN));
        let extractor = Extractor::new(llm.clone(), "test-model");

        let extraction = extractor.extract("  ran 5km, felt great ", today()).unwrap();
        assert_eq!(extraction.candidate.category.as_deref(), Some("exercise"));
        assert_eq!(extraction.candidate.raw_input, "ran 5km, felt great");
        assert_eq!(extraction.llm_calls, 1);
        assert!(!extraction.from_cache);

        let requests = llm.requests();
        assert_eq!(requests[0].operation, Operation::Extract);
        assert_eq!(requests[0].model, "test-model");
    }

    #[test]
    fn accepts_fenced_json() {
        let fenced = format!("Here you go:\n```json\n{RUN}\n```");
        let extractor = Extractor::new(Arc::new(MockLlmClient::new(&fenced)), "m");
        let extraction = extractor.extract("ran 5km", today()).unwrap();
        assert_eq!(extraction.candidate.mood.as_deref(), Some("positive"));
    }

    #[test]
    fn corrects_non_json_response() {
        let llm = Arc::new(SequenceLlmClient::with_responses(&["Sure! You ran.", RUN]));
        let extractor = Extractor::new(llm.clone(), "m");

        let extraction = extractor.extract("ran 5km", today()).unwrap();
        assert_eq!(extraction.llm_calls, 2);

        // Second request replays the bad answer and asks for a fix.
        let second = &llm.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[1].role, Role::Assistant);
        assert_eq!(second.messages[1].content, "Sure! You ran.");
        assert!(second.messages[2].content.contains("could not be used"));
    }

    #[test]
    fn corrects_missing_required_field() {
        let llm = Arc::new(SequenceLlmClient::with_responses(&[
            r#"{"category": "exercise", "metrics": {}}"#,
            RUN,
        ]));
        let extractor = Extractor::new(llm.clone(), "m");
        extractor.extract("ran 5km", today()).unwrap();
        assert!(llm.requests()[1].messages[2].content.contains("mood"));
    }

    #[test]
    fn gives_up_after_max_corrections() {
        let llm = Arc::new(MockLlmClient::new("no json here"));
        let extractor = Extractor::new(llm.clone(), "m").with_max_corrections(1);

        let err = extractor.extract("ran 5km", today()).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedResponse { attempts: 2, .. }));
        assert_eq!(llm.call_count(), 2);
    }

    #[test]
    fn upstream_errors_are_not_corrected() {
        let llm = Arc::new(SequenceLlmClient::new(vec![Err(LlmError::MissingApiKey("anthropic".into()))]));
        let extractor = Extractor::new(llm.clone(), "m");
        let err = extractor.extract("ran 5km", today()).unwrap_err();
        assert_eq!(err, ExtractionError::Llm(LlmError::MissingApiKey("anthropic".into())));
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn empty_input_makes_no_call() {
        let llm = Arc::new(MockLlmClient::new(RUN));
        let extractor = Extractor::new(llm.clone(), "m");
        assert_eq!(extractor.extract("   ", today()).unwrap_err(), ExtractionError::EmptyInput);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn cache_serves_repeated_input() {
        let llm = Arc::new(MockLlmClient::new(RUN));
        let extractor = Extractor::new(llm.clone(), "m").with_cache(cache());

        extractor.extract("Ran 5km", today()).unwrap();
        let second = extractor.extract("ran   5km", today()).unwrap();

        assert!(second.from_cache);
        assert_eq!(second.llm_calls, 0);
        assert_eq!(second.candidate.raw_input, "ran   5km");
        assert_eq!(llm.call_count(), 1);

        let stats = extractor.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn cache_is_per_reference_day() {
        let llm = Arc::new(MockLlmClient::new(RUN));
        let extractor = Extractor::new(llm.clone(), "m").with_cache(cache());
        extractor.extract("ran 5km yesterday", today()).unwrap();
        extractor
            .extract("ran 5km yesterday", today().succ_opt().unwrap())
            .unwrap();
        assert_eq!(llm.call_count(), 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let llm = Arc::new(SequenceLlmClient::new(vec![
            Err(LlmError::Connection("down".into())),
            Ok(RUN.to_string()),
        ]));
        let extractor = Extractor::new(llm.clone(), "m").with_cache(cache());
        assert!(extractor.extract("ran 5km", today()).is_err());
        assert!(!extractor.extract("ran 5km", today()).unwrap().from_cache);
    }

    #[test]
    fn batch_keeps_order_and_isolates_failures() {
        let llm = Arc::new(SequenceLlmClient::new(vec![
            Ok(RUN.to_string()),
            Err(LlmError::MissingApiKey("anthropic".into())),
        ]));
        let extractor = Extractor::new(llm, "m").with_cache(cache());

        let batch = extractor.extract_batch(&["ran 5km", "slept 8h", "ran 5km", ""], today());
        assert_eq!(batch.results.len(), 4);
        assert!(batch.results[0].is_ok());
        assert!(batch.results[1].is_err());
        assert!(batch.results[2].as_ref().unwrap().from_cache);
        assert_eq!(batch.results[3].as_ref().unwrap_err(), &ExtractionError::EmptyInput);

        assert_eq!(batch.summary.total, 4);
        assert_eq!(batch.summary.succeeded, 2);
        assert_eq!(batch.summary.failed, 2);
        assert_eq!(batch.summary.from_cache, 1);
        assert_eq!(batch.summary.llm_calls, 1);
    }

    #[test]
    fn settings_control_cache() {
        let mut settings = Settings::default();
        settings.extraction.cache_enabled = false;
        let extractor = Extractor::from_settings(Arc::new(MockLlmClient::new(RUN)), &settings);
        assert!(extractor.cache_stats().is_none());

        settings.extraction.cache_enabled = true;
        let extractor = Extractor::from_settings(Arc::new(MockLlmClient::new(RUN)), &settings);
        assert_eq!(extractor.cache_stats().unwrap().capacity, 1000);
        assert_eq!(extractor.model(), settings.llm.extraction_model);
    }
}

use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use uuid::Uuid;

use super::{Agent, AgentError, Stage};
use crate::db::{now, DatabaseError, Repository};
use crate::extraction::Extractor;
use crate::models::{CandidateRecord, Category, Entry, Metrics, Mood, NewEntry};
use crate::validation::validate_candidate;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub text: String,
    /// "Now" for the purpose of this entry; resolves missing date and time.
    pub reference: NaiveDateTime,
    /// Forces the entry date regardless of what extraction found.
    pub date: Option<NaiveDate>,
}

impl RecordRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reference: now(),
            date: None,
        }
    }

    pub fn at(mut self, reference: NaiveDateTime) -> Self {
        self.reference = reference;
        self
    }

    pub fn on(mut self, date: Option<NaiveDate>) -> Self {
        self.date = date;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingOutcome {
    pub entry_id: i64,
    pub entry: Entry,
    pub feedback: String,
    pub stages: Vec<Stage>,
    /// Extraction was served from the cache.
    pub cached: bool,
}

/// Extraction plus validation, without storing anything.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingPreview {
    pub candidate: CandidateRecord,
    pub entry: NewEntry,
    pub feedback: String,
    pub cached: bool,
}

/// Free text → stored entry: received, extracted, validated, stored,
/// feedback generated. Any failure ends the run with
/// [`AgentError::StageFailed`] naming the step that failed.
pub struct RecordingAgent {
    extractor: Arc<Extractor>,
    repo: Repository,
}

impl RecordingAgent {
    pub fn new(extractor: Arc<Extractor>, repo: Repository) -> Self {
        Self { extractor, repo }
    }

    pub fn preview(&self, request: &RecordRequest) -> Result<RecordingPreview, AgentError> {
        let (candidate, cached) = self.extract(request)?;
        let entry = validate_candidate(&candidate, request.reference)
            .map_err(|e| AgentError::at(Stage::Validated, e))?;
        Ok(RecordingPreview {
            feedback: feedback_for(entry.category, entry.mood, &entry.metrics),
            candidate,
            entry,
            cached,
        })
    }

    fn extract(&self, request: &RecordRequest) -> Result<(CandidateRecord, bool), AgentError> {
        let extraction = self
            .extractor
            .extract(&request.text, request.reference.date())
            .map_err(|e| AgentError::at(Stage::Extracted, e))?;
        let mut candidate = extraction.candidate;
        if let Some(date) = request.date {
            candidate.date = Some(date.format("%Y-%m-%d").to_string());
        }
        Ok((candidate, extraction.from_cache))
    }
}

impl Agent for RecordingAgent {
    type Input = RecordRequest;
    type Output = RecordingOutcome;

    fn name(&self) -> &'static str {
        "recording"
    }

    fn execute(&self, input: RecordRequest) -> Result<RecordingOutcome, AgentError> {
        let request_id = Uuid::new_v4();
        let _span = tracing::info_span!("agent", agent = self.name(), %request_id).entered();
        let started = Instant::now();
        let mut stages = vec![Stage::Received];

        let (candidate, cached) = self.extract(&input).inspect_err(|e| log_failure(e))?;
        stages.push(Stage::Extracted);

        let new_entry = validate_candidate(&candidate, input.reference)
            .map_err(|e| AgentError::at(Stage::Validated, e))
            .inspect_err(log_failure)?;
        stages.push(Stage::Validated);

        let entry_id = self
            .repo
            .insert_entry(&new_entry)
            .map_err(|e| AgentError::at(Stage::Stored, e))
            .inspect_err(log_failure)?;
        let entry = self
            .repo
            .get_entry(entry_id)
            .and_then(|found| {
                found.ok_or(DatabaseError::NotFound {
                    entity_type: "entry".into(),
                    id: entry_id.to_string(),
                })
            })
            .map_err(|e| AgentError::at(Stage::Stored, e))
            .inspect_err(log_failure)?;
        stages.push(Stage::Stored);

        let feedback = feedback_for(entry.category, entry.mood, &entry.metrics);
        stages.push(Stage::FeedbackGenerated);

        tracing::info!(
            entry_id,
            category = %entry.category,
            cached,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Entry recorded"
        );

        Ok(RecordingOutcome {
            entry_id,
            entry,
            feedback,
            stages,
            cached,
        })
    }
}

fn log_failure(e: &AgentError) {
    tracing::warn!(stage = ?e.stage(), kind = ?e.kind(), error = %e, "Recording failed");
}

/// `✓ Recorded exercise 😊 | distance km: 5, duration min: 30`
pub fn feedback_for(category: Category, mood: Mood, metrics: &Metrics) -> String {
    let mut feedback = format!("✓ Recorded {category} {}", mood.emoji());
    if !metrics.is_empty() {
        let parts: Vec<String> = metrics
            .iter()
            .map(|(key, value)| format!("{}: {value}", key.replace('_', " ")))
            .collect();
        feedback.push_str(" | ");
        feedback.push_str(&parts.join(", "));
    }
    feedback
}

//! Use-case orchestrators composed from extraction, validation, storage and
//! analysis. Each exposes one synchronous entry point through [`Agent`].

pub mod analysis;
pub mod query;
pub mod recording;

pub use analysis::*;
pub use query::*;
pub use recording::*;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::db::DatabaseError;
use crate::extraction::ExtractionError;
use crate::llm::LlmError;
use crate::validation::ValidationError;

pub trait Agent {
    type Input;
    type Output;

    fn name(&self) -> &'static str;

    fn execute(&self, input: Self::Input) -> Result<Self::Output, AgentError>;
}

/// Recording state machine. Each stage is reached only if the one before succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Extracted,
    Validated,
    Stored,
    FeedbackGenerated,
}

impl Stage {
    /// Name of the step that leads into this stage.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Received => "receive",
            Self::Extracted => "extract",
            Self::Validated => "validate",
            Self::Stored => "store",
            Self::FeedbackGenerated => "feedback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Storage,
    Upstream,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] LlmError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Recording failed at {stage}: {source}")]
    StageFailed {
        stage: Stage,
        source: Box<AgentError>,
    },
}

impl AgentError {
    pub(crate) fn at(stage: Stage, source: impl Into<AgentError>) -> Self {
        AgentError::StageFailed {
            stage,
            source: Box::new(source.into()),
        }
    }

    /// The originating error, with any stage wrapper removed.
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            AgentError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            AgentError::Extraction(ExtractionError::EmptyInput) | AgentError::Validation(_) => {
                ErrorKind::Validation
            }
            AgentError::Extraction(_) | AgentError::Upstream(_) => ErrorKind::Upstream,
            AgentError::Analysis(AnalysisError::UnsupportedFormat(_)) => ErrorKind::Validation,
            AgentError::Storage(_) | AgentError::Analysis(_) => ErrorKind::Storage,
            AgentError::StageFailed { .. } => ErrorKind::Storage,
        }
    }

    /// Short message fit for an end user; never a raw payload.
    pub fn user_message(&self) -> String {
        match self.root() {
            AgentError::Extraction(ExtractionError::EmptyInput)
            | AgentError::Validation(ValidationError::EmptyInput) => {
                "Please tell me what you did, for example \"ran 5km today\".".to_string()
            }
            AgentError::Validation(reason) => format!("I couldn't record that: {reason}."),
            AgentError::Extraction(ExtractionError::MalformedResponse { .. }) => {
                "I couldn't understand that entry. Try rephrasing it more simply.".to_string()
            }
            AgentError::Extraction(ExtractionError::Llm(e)) | AgentError::Upstream(e) => {
                upstream_message(e)
            }
            AgentError::Analysis(AnalysisError::UnsupportedFormat(format)) => {
                format!("The format '{format}' isn't supported.")
            }
            AgentError::Analysis(AnalysisError::WindowOutOfRange { weeks, .. }) => {
                format!("A {weeks}-week window reaches too far back. Try fewer weeks.")
            }
            AgentError::Analysis(AnalysisError::Io { path, .. }) => {
                format!("I couldn't write to {path}.")
            }
            AgentError::Storage(_) | AgentError::Analysis(_) | AgentError::StageFailed { .. } => {
                "Your data couldn't be read or saved right now. Please try again.".to_string()
            }
        }
    }
}

fn upstream_message(e: &LlmError) -> String {
    let last = match e {
        LlmError::RetriesExhausted { last, .. } => last.as_ref(),
        other => other,
    };
    match last {
        LlmError::MissingApiKey(_) | LlmError::Authentication { .. } => {
            "No valid API key is configured for the language service.".to_string()
        }
        LlmError::RateLimited(_) => {
            "The language service is busy. Please try again in a minute.".to_string()
        }
        _ => "The language service is unavailable right now. Please try again shortly.".to_string(),
    }
}

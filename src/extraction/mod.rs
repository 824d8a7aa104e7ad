//! Free text → candidate record, via the LLM.

pub mod cache;
pub mod classify;
pub mod extractor;
pub mod prompt;

pub use cache::*;
pub use classify::*;
pub use extractor::*;
pub use prompt::*;

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Nothing to extract: input is empty")]
    EmptyInput,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("LLM response unusable after {attempts} attempts: {reason}")]
    MalformedResponse { attempts: u32, reason: String },
}

//! Grounded answer generation
//!
//! Builds the three-lane grounded prompt, parses the model's strict
//! structured response, computes grounding metrics locally, and applies
//! the abstention rules. Grounding-rule violations downgrade the artifact
//! to an abstention; only backend and schema failures are errors.

pub mod generator;
pub mod metrics;
pub mod prompt;
pub mod schema;

pub use generator::{AnswerGenerator, GenerationInput};
pub use metrics::{analyze_grounding, GroundingReport};
pub use schema::{RawAnswer, RawAnswerKind, ScoreOrNa};

use thiserror::Error;

/// Answer-generation errors
#[derive(Error, Debug)]
pub enum AnswerError {
    #[error("generation backend: {0}")]
    Backend(#[from] parley_llm::LlmError),

    #[error("structured response malformed: {0}")]
    Malformed(String),
}

impl From<AnswerError> for parley_core::Error {
    fn from(err: AnswerError) -> Self {
        match err {
            AnswerError::Backend(e) => {
                parley_core::Error::GenerationBackendFailure(e.to_string())
            }
            AnswerError::Malformed(msg) => parley_core::Error::StructuredResponseMalformed(msg),
        }
    }
}

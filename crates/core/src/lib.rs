//! Core data model for the Parley grounded-QA service
//!
//! Shared across every crate in the workspace:
//! - Document / chunk records and references
//! - Retrieved passages with per-signal scores
//! - Answer artifacts with grounding evidence
//! - Conversation turns
//! - The service-wide error taxonomy

pub mod artifact;
pub mod document;
pub mod passage;
pub mod turn;

pub use artifact::{
    AnswerArtifact, AnswerKind, EntitySupport, GroundingEvidence, Span, TermSupport,
};
pub use document::{Chunk, ChunkRef, DocKind, DocRef, Document};
pub use passage::{RetrievedPassage, SignalScores};
pub use turn::{conversation_snippet, Turn, TurnRole};

use thiserror::Error;

/// Service-wide error taxonomy. Each subsystem has its own error enum and
/// converts into one of these kinds at the boundary; HTTP status mapping
/// lives in the server crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("retrieval backend failure: {0}")]
    RetrievalBackendFailure(String),

    #[error("generation backend failure: {0}")]
    GenerationBackendFailure(String),

    #[error("structured response malformed: {0}")]
    StructuredResponseMalformed(String),

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

impl Error {
    /// Stable machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SessionNotFound(_) => "session_not_found",
            Error::RetrievalBackendFailure(_) => "retrieval_backend_failure",
            Error::GenerationBackendFailure(_) => "generation_backend_failure",
            Error::StructuredResponseMalformed(_) => "structured_response_malformed",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::ConfigurationInvalid(_) => "configuration_invalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(
            Error::SessionNotFound("x".into()).kind(),
            "session_not_found"
        );
        assert_eq!(
            Error::DeadlineExceeded(std::time::Duration::from_secs(60)).kind(),
            "deadline_exceeded"
        );
    }
}

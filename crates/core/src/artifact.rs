//! Answer artifacts
//!
//! The terminal value of every request. Abstention is a value, never an
//! exception: grounding-rule violations downgrade the artifact instead of
//! raising.
//!
//! Invariants enforced by the constructors:
//! - clarification and abstention artifacts carry `faithfulness` and
//!   `completeness` as n/a (`None`)
//! - direct artifacts carry numeric values for both

use serde::{Deserialize, Serialize};

use crate::document::ChunkRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerKind {
    Direct,
    Clarification,
    Abstain,
}

impl AnswerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerKind::Direct => "direct",
            AnswerKind::Clarification => "clarification",
            AnswerKind::Abstain => "abstain",
        }
    }
}

/// Character span into the answer text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A term of the answer found in a cited passage, with its IDF weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSupport {
    pub term: String,
    pub spans: Vec<Span>,
    pub idf: f32,
}

/// A recognized entity of the answer and whether a cited passage backs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySupport {
    pub text: String,
    pub entity_type: String,
    pub spans: Vec<Span>,
    pub supported: bool,
}

/// Evidence computed locally from the answer text and the cited passages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundingEvidence {
    pub supported_terms: Vec<TermSupport>,
    pub entities: Vec<EntitySupport>,
}

/// Structured answer returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerArtifact {
    pub answer: String,
    pub kind: AnswerKind,
    pub abstained: bool,
    /// `None` renders as `"n/a"` on the wire.
    pub faithfulness: Option<f32>,
    pub completeness: Option<f32>,
    pub missing_information: Vec<String>,
    pub reasoning_notes: String,
    pub clarification: Option<String>,
    pub evidence: GroundingEvidence,
    /// Passages the answer actually cites; always a subset of the
    /// retrieval set handed to the generator.
    pub cited: Vec<ChunkRef>,
}

impl AnswerArtifact {
    /// A direct, grounded answer. Scores are clipped into [0, 1].
    pub fn direct(answer: impl Into<String>, faithfulness: f32, completeness: f32) -> Self {
        Self {
            answer: answer.into(),
            kind: AnswerKind::Direct,
            abstained: false,
            faithfulness: Some(faithfulness.clamp(0.0, 1.0)),
            completeness: Some(completeness.clamp(0.0, 1.0)),
            missing_information: Vec::new(),
            reasoning_notes: String::new(),
            clarification: None,
            evidence: GroundingEvidence::default(),
            cited: Vec::new(),
        }
    }

    /// An abstention; quality scores are n/a by construction.
    pub fn abstain(reason: impl Into<String>) -> Self {
        Self {
            answer: "This question cannot be answered with the available information.".into(),
            kind: AnswerKind::Abstain,
            abstained: true,
            faithfulness: None,
            completeness: None,
            missing_information: Vec::new(),
            reasoning_notes: reason.into(),
            clarification: None,
            evidence: GroundingEvidence::default(),
            cited: Vec::new(),
        }
    }

    /// A clarification question back to the user.
    pub fn clarification(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            answer: question.clone(),
            kind: AnswerKind::Clarification,
            abstained: true,
            faithfulness: None,
            completeness: None,
            missing_information: Vec::new(),
            reasoning_notes: String::new(),
            clarification: Some(question),
            evidence: GroundingEvidence::default(),
            cited: Vec::new(),
        }
    }

    pub fn with_missing(mut self, missing: Vec<String>) -> Self {
        self.missing_information = missing;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.reasoning_notes = notes.into();
        self
    }

    /// Check the cross-field invariants; violated artifacts are a bug in
    /// the generator, so this is used by tests and debug assertions.
    pub fn invariants_hold(&self) -> bool {
        let scores_match_kind = match self.kind {
            AnswerKind::Direct => self.faithfulness.is_some() && self.completeness.is_some(),
            AnswerKind::Clarification | AnswerKind::Abstain => {
                self.faithfulness.is_none() && self.completeness.is_none()
            }
        };
        let spans_in_bounds = self
            .evidence
            .supported_terms
            .iter()
            .flat_map(|t| t.spans.iter())
            .chain(self.evidence.entities.iter().flat_map(|e| e.spans.iter()))
            .all(|s| s.start <= s.end && s.end <= self.answer.len());
        scores_match_kind && spans_in_bounds
    }
}

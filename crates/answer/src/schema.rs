//! Strict structured-response schema
//!
//! The model must return exactly one JSON object matching [`RawAnswer`].
//! Unknown fields, missing fields, wrong types and out-of-range scores
//! all fail the parse; there is no heuristic repair. The caller may retry
//! once with a schema reminder.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::AnswerError;

/// A quality score: numeric in [0, 1] or the literal token `"n/a"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreOrNa {
    Value(f32),
    NotApplicable,
}

impl ScoreOrNa {
    pub fn value(&self) -> Option<f32> {
        match self {
            ScoreOrNa::Value(v) => Some(*v),
            ScoreOrNa::NotApplicable => None,
        }
    }
}

impl Serialize for ScoreOrNa {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScoreOrNa::Value(v) => serializer.serialize_f32(*v),
            ScoreOrNa::NotApplicable => serializer.serialize_str("n/a"),
        }
    }
}

impl<'de> Deserialize<'de> for ScoreOrNa {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoreVisitor;

        impl<'de> Visitor<'de> for ScoreVisitor {
            type Value = ScoreOrNa;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a number in [0, 1] or the string \"n/a\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if (0.0..=1.0).contains(&v) {
                    Ok(ScoreOrNa::Value(v as f32))
                } else {
                    Err(E::custom(format!("score out of range: {v}")))
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "n/a" {
                    Ok(ScoreOrNa::NotApplicable)
                } else {
                    Err(E::custom(format!("expected \"n/a\", got {v:?}")))
                }
            }
        }

        deserializer.deserialize_any(ScoreVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawAnswerKind {
    Direct,
    Clarification,
    Abstain,
}

/// The structured response the prompt demands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAnswer {
    pub answer: String,
    pub answer_kind: RawAnswerKind,
    pub abstained: bool,
    pub faithfulness: ScoreOrNa,
    pub completeness: ScoreOrNa,
    pub missing_information: Vec<String>,
    pub reasoning_notes: String,
    #[serde(default)]
    pub clarifying_question: Option<String>,
    /// Passage ordinals like "C1"; validated against the presented set.
    pub citations: Vec<String>,
}

impl RawAnswer {
    /// Parse a model response. Strict: the trimmed text must be exactly
    /// one JSON object conforming to the schema.
    pub fn parse(raw: &str) -> Result<Self, AnswerError> {
        let trimmed = raw.trim();
        serde_json::from_str(trimmed)
            .map_err(|e| AnswerError::Malformed(format!("{e} in {:.120}", trimmed)))
    }

    /// Resolve a citation ordinal ("C3") to its 0-based index, bounded by
    /// the presented passage count.
    pub fn ordinal_index(citation: &str, presented: usize) -> Option<usize> {
        let number: usize = citation.strip_prefix('C')?.parse().ok()?;
        if number >= 1 && number <= presented {
            Some(number - 1)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> String {
        serde_json::json!({
            "answer": "Gold tier requires $20,000 in combined balances.",
            "answer_kind": "direct",
            "abstained": false,
            "faithfulness": 0.95,
            "completeness": 0.9,
            "missing_information": [],
            "reasoning_notes": "Stated directly in C1.",
            "clarifying_question": null,
            "citations": ["C1"]
        })
        .to_string()
    }

    #[test]
    fn valid_response_parses() {
        let parsed = RawAnswer::parse(&valid_json()).unwrap();
        assert_eq!(parsed.answer_kind, RawAnswerKind::Direct);
        assert_eq!(parsed.faithfulness.value(), Some(0.95));
        assert_eq!(parsed.citations, vec!["C1"]);
    }

    #[test]
    fn na_token_parses_as_not_applicable() {
        let raw = valid_json()
            .replace("0.95", "\"n/a\"")
            .replace("0.9", "\"n/a\"");
        let parsed = RawAnswer::parse(&raw).unwrap();
        assert_eq!(parsed.faithfulness, ScoreOrNa::NotApplicable);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let raw = valid_json().replacen('{', "{\"extra\": 1,", 1);
        assert!(RawAnswer::parse(&raw).is_err());
    }

    #[test]
    fn missing_field_is_rejected() {
        let raw = valid_json().replace("\"abstained\":false,", "");
        assert!(RawAnswer::parse(&raw).is_err());
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let raw = valid_json().replace("0.95", "1.4");
        assert!(RawAnswer::parse(&raw).is_err());
    }

    #[test]
    fn prose_around_json_is_rejected() {
        let raw = format!("Here you go:\n{}", valid_json());
        assert!(RawAnswer::parse(&raw).is_err());
    }

    #[test]
    fn ordinal_resolution_is_bounded() {
        assert_eq!(RawAnswer::ordinal_index("C1", 3), Some(0));
        assert_eq!(RawAnswer::ordinal_index("C3", 3), Some(2));
        assert_eq!(RawAnswer::ordinal_index("C4", 3), None);
        assert_eq!(RawAnswer::ordinal_index("C0", 3), None);
        assert_eq!(RawAnswer::ordinal_index("X1", 3), None);
    }
}

//! Authority score configuration
//!
//! A document's authority prior in [0, 1] is the mean of its domain
//! authority and its document-kind authority. Both tables are plain
//! configuration so deployments can tune trust per corpus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Hostname → trust score.
    pub domains: HashMap<String, f32>,
    /// Document kind → reliability score.
    pub kinds: HashMap<String, f32>,
    /// Used when a domain or kind has no entry.
    pub default_score: f32,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        let domains = HashMap::from([
            ("www.bankofamerica.com".into(), 0.95),
            ("bankofamerica.com".into(), 0.9),
            ("promotions.bankofamerica.com".into(), 0.9),
            ("merrill.com".into(), 0.85),
            ("sec.gov".into(), 0.9),
            ("local".into(), 0.5),
        ]);
        let kinds = HashMap::from([
            ("disclosure".into(), 1.0),
            ("terms".into(), 0.95),
            ("faq".into(), 0.8),
            ("landing".into(), 0.7),
            ("promo".into(), 0.6),
            ("form".into(), 0.75),
            ("other".into(), 0.5),
        ]);
        Self {
            domains,
            kinds,
            default_score: 0.5,
        }
    }
}

impl AuthorityConfig {
    pub fn domain_score(&self, host: &str) -> f32 {
        *self.domains.get(host).unwrap_or(&self.default_score)
    }

    pub fn kind_score(&self, kind: &str) -> f32 {
        *self.kinds.get(kind).unwrap_or(&self.default_score)
    }

    /// Combined authority: mean of domain and kind scores.
    pub fn score(&self, host: &str, kind: &str) -> f32 {
        (self.domain_score(host) + self.kind_score(kind)) / 2.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |field: &str, value: f32| ConfigError::InvalidValue {
            field: field.into(),
            message: format!("authority score must be in [0, 1], got {value}"),
        };
        for (host, score) in &self.domains {
            if !(0.0..=1.0).contains(score) {
                return Err(out_of_range(&format!("authority.domains.{host}"), *score));
            }
        }
        for (kind, score) in &self.kinds {
            if !(0.0..=1.0).contains(score) {
                return Err(out_of_range(&format!("authority.kinds.{kind}"), *score));
            }
        }
        if !(0.0..=1.0).contains(&self.default_score) {
            return Err(out_of_range("authority.default_score", self.default_score));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_averages_domain_and_kind() {
        let config = AuthorityConfig::default();
        let score = config.score("www.bankofamerica.com", "disclosure");
        assert!((score - 0.975).abs() < 1e-6);
    }

    #[test]
    fn unknown_entries_fall_back_to_default() {
        let config = AuthorityConfig::default();
        assert_eq!(config.score("unknown.example", "unknown"), 0.5);
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let mut config = AuthorityConfig::default();
        config.kinds.insert("promo".into(), 1.3);
        assert!(config.validate().is_err());
    }
}

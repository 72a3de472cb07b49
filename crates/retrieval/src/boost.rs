//! Heuristic re-ranking term
//!
//! A single additive adjustment on top of the fused RRF score:
//! authority prior, currency/number presence, and freshness decay. The
//! caller clips the total so heuristics can nudge but never dominate.

use chrono::{DateTime, Utc};

use parley_config::HybridConfig;
use parley_core::{Chunk, Document};

/// Exponential decay from the document's `updated_at`: 1.0 when updated
/// now, halving every `half_life_days`. Documents without an update
/// timestamp contribute nothing.
pub fn freshness_decay(
    updated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_days: f32,
) -> f32 {
    let Some(updated) = updated_at else {
        return 0.0;
    };
    let age_days = (now - updated).num_seconds().max(0) as f32 / 86_400.0;
    0.5f32.powf(age_days / half_life_days)
}

/// The unclipped adjustment for one passage.
pub fn heuristic_boost(
    doc: &Document,
    chunk: &Chunk,
    config: &HybridConfig,
    now: DateTime<Utc>,
) -> f32 {
    let mut adjustment = doc.authority * config.w_authority;
    if chunk.has_currency {
        adjustment += config.w_currency;
    }
    if chunk.has_numbers {
        adjustment += config.w_numbers;
    }
    adjustment += freshness_decay(doc.updated_at, now, config.freshness_half_life_days)
        * config.w_freshness;
    adjustment
}

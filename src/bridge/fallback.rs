//! Heuristic stand-in when the external analysis cannot be used.
//!
//! Same shape as a real result so consumers never branch on it; only
//! [`super::ResultSource::Fallback`] marks it. Sentiment is near zero with a
//! little jitter and confidence is pinned low.

use rand::Rng;
use std::collections::BTreeMap;

use super::{EntityInsight, ExternalAnalysis};

/// Overall confidence reported for a synthesized result.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Per-entity confidence for a synthesized insight.
pub const FALLBACK_ENTITY_CONFIDENCE: f64 = 0.2;

const JITTER: f64 = 0.05;

pub fn synthesize<R: Rng + ?Sized>(entities: &[String], reason: &str, rng: &mut R) -> ExternalAnalysis {
    let entities: BTreeMap<String, EntityInsight> = entities
        .iter()
        .map(|e| e.trim().to_uppercase())
        .filter(|e| !e.is_empty())
        .map(|e| {
            let insight = EntityInsight {
                sentiment: rng.random_range(-JITTER..=JITTER),
                confidence: FALLBACK_ENTITY_CONFIDENCE,
                outlook: Some("neutral".into()),
                summary: Some(format!("heuristic estimate for {e}; external analysis unavailable")),
            };
            (e, insight)
        })
        .collect();

    ExternalAnalysis {
        confidence: FALLBACK_CONFIDENCE,
        entities,
        summary: Some(format!("fallback analysis ({reason})")),
    }
}

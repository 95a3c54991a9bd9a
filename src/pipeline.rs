//! Facade: one call from a list of symbols to an [`AnalysisResult`].
//!
//! Per entity it reads the cached sentiment sample and the stored price
//! series, computes indicators and the composite signal; then it asks the
//! [`AnalysisBridge`] once for the whole set. Missing local data never fails
//! the call, it only lowers `overall_confidence`. Store and cache outages do.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregate::{sentiment_cache_key, SentimentSample};
use crate::bridge::{AnalysisBridge, EntityInsight, ResultSource};
use crate::cache::Cache;
use crate::error::PipelineError;
use crate::indicators::{IndicatorEngine, IndicatorSet};
use crate::signal::{CompositeSignal, SignalScorer};
use crate::store::RecordStore;

/// Share of the local confidence taken by data coverage; the rest is quality.
const COVERAGE_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityReport {
    pub sentiment: Option<SentimentSample>,
    pub technical_indicators: Option<IndicatorSet>,
    pub composite_signal: Option<CompositeSignal>,
    pub insight: Option<EntityInsight>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub entities: BTreeMap<String, EntityReport>,
    pub overall_confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub source: ResultSource,
    /// SHA-256 hex of the serialized `entities` map.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Trim, upper-case and de-duplicate; order is sorted.
pub fn normalize_entities<S: AsRef<str>>(entities: &[S]) -> Vec<String> {
    let set: BTreeSet<String> = entities
        .iter()
        .map(|e| e.as_ref().trim().to_uppercase())
        .filter(|e| !e.is_empty())
        .collect();
    set.into_iter().collect()
}

pub fn content_hash(entities: &BTreeMap<String, EntityReport>) -> String {
    let bytes = serde_json::to_vec(entities).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Blend local coverage/quality with the analysis' own confidence.
pub fn overall_confidence(entities: &BTreeMap<String, EntityReport>, analysis_confidence: f64) -> f64 {
    if entities.is_empty() {
        return 0.0;
    }
    let components = entities.len() * 2;
    let present: usize = entities
        .values()
        .map(|r| r.sentiment.is_some() as usize + r.composite_signal.is_some() as usize)
        .sum();
    let coverage = present as f64 / components as f64;

    let confs: Vec<f64> = entities
        .values()
        .filter_map(|r| r.sentiment.as_ref().map(|s| s.confidence))
        .collect();
    let quality = if confs.is_empty() {
        0.0
    } else {
        confs.iter().sum::<f64>() / confs.len() as f64
    };

    let local = COVERAGE_WEIGHT * coverage + (1.0 - COVERAGE_WEIGHT) * quality;
    let blended = (local + analysis_confidence) / 2.0;
    if blended.is_finite() {
        blended.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
    engine: IndicatorEngine,
    scorer: SignalScorer,
    bridge: Arc<AnalysisBridge>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        engine: IndicatorEngine,
        scorer: SignalScorer,
        bridge: Arc<AnalysisBridge>,
    ) -> Self {
        Self {
            store,
            cache,
            engine,
            scorer,
            bridge,
        }
    }

    pub fn bridge(&self) -> &Arc<AnalysisBridge> {
        &self.bridge
    }

    pub async fn analyze<S: AsRef<str>>(&self, entities: &[S]) -> Result<AnalysisResult, PipelineError> {
        let symbols = normalize_entities(entities);
        if symbols.is_empty() {
            return Err(PipelineError::NoEntities);
        }

        let reports = try_join_all(symbols.iter().map(|s| self.local_report(s))).await?;
        let mut map: BTreeMap<String, EntityReport> = symbols.iter().cloned().zip(reports).collect();

        let outcome = self.bridge.analyze(&symbols).await;
        for (sym, report) in map.iter_mut() {
            report.insight = outcome.analysis.entities.get(sym).cloned();
        }

        let overall = overall_confidence(&map, outcome.analysis.confidence);
        let result = AnalysisResult {
            content_hash: content_hash(&map),
            entities: map,
            overall_confidence: overall,
            generated_at: Utc::now(),
            source: outcome.source,
            summary: outcome.analysis.summary.clone(),
        };
        info!(
            target: "pipeline",
            entities = symbols.len(),
            source = ?result.source,
            cached = outcome.cached,
            overall_confidence = result.overall_confidence,
            "analysis ready"
        );
        Ok(result)
    }

    async fn local_report(&self, entity: &str) -> Result<EntityReport, PipelineError> {
        let sentiment = self.sentiment(entity).await?;

        let (technical_indicators, composite_signal) = match self.store.price_series(entity).await? {
            Some(series) => match self.engine.compute(&series) {
                Ok(set) => {
                    let signal = self.scorer.score(&set);
                    (Some(set), Some(signal))
                }
                Err(e) => {
                    debug!(target: "pipeline", entity, error = %e, "no indicators");
                    (None, None)
                }
            },
            None => {
                debug!(target: "pipeline", entity, "no price series");
                (None, None)
            }
        };

        Ok(EntityReport {
            sentiment,
            technical_indicators,
            composite_signal,
            insight: None,
        })
    }

    async fn sentiment(&self, entity: &str) -> Result<Option<SentimentSample>, PipelineError> {
        let Some(payload) = self.cache.get(&sentiment_cache_key(entity)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(sample) => Ok(Some(sample)),
            Err(e) => {
                warn!(target: "pipeline", entity, error = %e, "unreadable cached sentiment sample");
                Ok(None)
            }
        }
    }
}

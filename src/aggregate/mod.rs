//! Aggregator: turns ingested records into per-entity samples.
//!
//! Two duties share one buffer:
//! * [`Aggregator::ingest`] fetches every source (bounded parallel), appends
//!   price ticks to the record store and scores text records into the buffer.
//! * [`Aggregator::aggregate`] reduces the buffered scores over the trailing
//!   window into one [`SentimentSample`] per entity, written to the store and
//!   to the cache under [`sentiment_cache_key`].
//!
//! [`Aggregator::run_cycle`] runs both back to back. The scheduler in
//! [`scheduler`] runs them on independent tickers.

pub mod scheduler;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::error::PipelineError;
use crate::ingest::{self, anon_hash, fetcher::SourceFetcher, types::RawRecord};
use crate::sentiment::SentimentAnalyzer;
use crate::series::PriceSample;
use crate::store::RecordStore;

/// Newer-half minus older-half weighted mean beyond which a trend is reported.
const TREND_DEAD_BAND: f64 = 0.1;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "aggregate_samples_written_total",
            "Sentiment samples written to store and cache."
        );
        describe_counter!(
            "aggregate_prices_appended_total",
            "Price samples appended to the record store."
        );
        describe_counter!(
            "aggregate_insufficient_total",
            "Entities skipped for lack of confident records."
        );
        describe_gauge!("aggregate_last_run_ts", "Unix ts of the last aggregation.");
    });
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Deteriorating,
    Stable,
}

/// Rolled-up sentiment for one entity over one aggregation window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentSample {
    pub entity: String,
    pub sentiment: f64,
    pub confidence: f64,
    pub sample_count: usize,
    pub window_start: u64,
    pub window_end: u64,
    pub trend: Trend,
}

pub fn sentiment_cache_key(entity: &str) -> String {
    format!("sentiment:{}", entity.to_ascii_uppercase())
}

/// Confidence-weighted mean sentiment and simple mean confidence.
///
/// Fails with `InsufficientData` for no records or zero total confidence.
pub fn weighted_sentiment(scores: &[(f64, f64)]) -> Result<(f64, f64), PipelineError> {
    let total_conf: f64 = scores.iter().map(|(_, c)| c.max(0.0)).sum();
    if scores.is_empty() || total_conf <= 0.0 {
        return Err(PipelineError::InsufficientData {
            required: 1,
            provided: 0,
        });
    }
    let weighted: f64 = scores.iter().map(|(s, c)| s * c.max(0.0)).sum();
    let mean_conf = total_conf / scores.len() as f64;
    Ok((
        (weighted / total_conf).clamp(-1.0, 1.0),
        mean_conf.clamp(0.0, 1.0),
    ))
}

/// Compare the newer half of time-ordered scores against the older half.
pub fn trend_of(ordered: &[(f64, f64)]) -> Trend {
    if ordered.len() < 2 {
        return Trend::Stable;
    }
    let (older, newer) = ordered.split_at(ordered.len() / 2);
    match (weighted_sentiment(older), weighted_sentiment(newer)) {
        (Ok((o, _)), Ok((n, _))) if n - o > TREND_DEAD_BAND => Trend::Improving,
        (Ok((o, _)), Ok((n, _))) if o - n > TREND_DEAD_BAND => Trend::Deteriorating,
        _ => Trend::Stable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorCfg {
    /// Trailing window text records count toward.
    pub window: Duration,
    /// TTL of the cached sentiment sample.
    pub sample_ttl: Duration,
    pub max_parallel: usize,
}

impl Default for AggregatorCfg {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 3600),
            sample_ttl: Duration::from_secs(3600),
            max_parallel: 4,
        }
    }
}

/// A text record after scoring; the text itself is not kept.
#[derive(Debug, Clone)]
struct Scored {
    id: String,
    entities: Vec<String>,
    at: u64,
    sentiment: f64,
    confidence: f64,
}

/// Outcome of one ingest pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub records: usize,
    pub prices_appended: usize,
    pub texts_buffered: usize,
}

/// Outcome of one aggregation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregateReport {
    pub written: Vec<SentimentSample>,
    pub insufficient: Vec<String>,
}

pub struct Aggregator {
    fetchers: Vec<SourceFetcher>,
    analyzer: SentimentAnalyzer,
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
    cfg: AggregatorCfg,
    buffer: Mutex<Vec<Scored>>,
}

impl Aggregator {
    pub fn new(
        fetchers: Vec<SourceFetcher>,
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        cfg: AggregatorCfg,
    ) -> Self {
        ensure_metrics_described();
        Self {
            fetchers,
            analyzer: SentimentAnalyzer::new(),
            store,
            cache,
            cfg,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.fetchers.len()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Ingest then aggregate with the current wall clock.
    pub async fn run_cycle(
        &self,
        entities: &[String],
    ) -> Result<(IngestReport, AggregateReport), PipelineError> {
        let ingested = self.ingest(entities).await?;
        let aggregated = self.aggregate(entities).await?;
        Ok((ingested, aggregated))
    }

    /// Fetch all sources; nothing is written until every fetch has finished.
    pub async fn ingest(&self, entities: &[String]) -> Result<IngestReport, PipelineError> {
        let records = ingest::run_once(&self.fetchers, self.cfg.max_parallel).await;
        self.absorb(entities, records, now_unix()).await
    }

    /// Apply one cycle's records: prices go to the store, texts to the buffer.
    pub async fn absorb(
        &self,
        entities: &[String],
        records: Vec<RawRecord>,
        now: u64,
    ) -> Result<IngestReport, PipelineError> {
        let tracked: BTreeSet<String> = entities.iter().map(|e| e.to_ascii_uppercase()).collect();
        let mut report = IngestReport {
            records: records.len(),
            ..Default::default()
        };

        let mut scored = Vec::new();
        for rec in records {
            let tags: Vec<String> = rec
                .entity_tags
                .iter()
                .filter(|t| tracked.contains(t.as_str()))
                .cloned()
                .collect();
            if tags.is_empty() {
                continue;
            }

            if let Some(price) = rec.price {
                let mut sample = PriceSample::new(rec.published_at, price, rec.volume.unwrap_or(0.0));
                sample.high = rec.high;
                sample.low = rec.low;
                for entity in &tags {
                    if self.store.append_price_sample(entity, sample).await? {
                        report.prices_appended += 1;
                    }
                }
            }

            if let Some(text) = rec.text.as_deref() {
                let s = self.analyzer.score(text, rec.engagement);
                scored.push(Scored {
                    id: anon_hash(&text.to_lowercase()),
                    entities: tags,
                    at: if rec.published_at == 0 { now } else { rec.published_at },
                    sentiment: s.sentiment,
                    confidence: s.confidence,
                });
            }
        }

        {
            let mut buf = self.buffer.lock();
            let mut seen: HashSet<String> = buf.iter().map(|s| s.id.clone()).collect();
            for s in scored {
                // the same article comes back every poll until it ages out
                if seen.insert(s.id.clone()) {
                    buf.push(s);
                    report.texts_buffered += 1;
                }
            }
        }

        counter!("aggregate_prices_appended_total").increment(report.prices_appended as u64);
        debug!(target: "aggregate", ?report, "records absorbed");
        Ok(report)
    }

    pub async fn aggregate(&self, entities: &[String]) -> Result<AggregateReport, PipelineError> {
        self.aggregate_at(entities, now_unix()).await
    }

    /// Write one sample per entity that has confident records in the window
    /// ending at `now`. Entities without any keep their previous sample.
    pub async fn aggregate_at(
        &self,
        entities: &[String],
        now: u64,
    ) -> Result<AggregateReport, PipelineError> {
        let window_start = now.saturating_sub(self.cfg.window.as_secs());
        let snapshot: Vec<Scored> = self
            .buffer
            .lock()
            .iter()
            .filter(|s| s.at >= window_start && s.at <= now)
            .cloned()
            .collect();

        let mut report = AggregateReport::default();
        for entity in entities.iter().map(|e| e.to_ascii_uppercase()) {
            let mut matching: Vec<&Scored> = snapshot
                .iter()
                .filter(|s| s.entities.iter().any(|t| *t == entity))
                .collect();
            matching.sort_by_key(|s| s.at);
            let pairs: Vec<(f64, f64)> = matching.iter().map(|s| (s.sentiment, s.confidence)).collect();

            let (sentiment, confidence) = match weighted_sentiment(&pairs) {
                Ok(v) => v,
                Err(e) => {
                    debug!(target: "aggregate", %entity, records = pairs.len(), error = %e, "no sample this cycle");
                    counter!("aggregate_insufficient_total").increment(1);
                    report.insufficient.push(entity);
                    continue;
                }
            };

            let sample = SentimentSample {
                entity: entity.clone(),
                sentiment,
                confidence,
                sample_count: pairs.len(),
                window_start: matching.first().map(|s| s.at).unwrap_or(window_start),
                window_end: matching.last().map(|s| s.at).unwrap_or(now),
                trend: trend_of(&pairs),
            };

            self.store.upsert_sentiment_sample(sample.clone()).await?;
            let payload = serde_json::to_string(&sample).map_err(|e| {
                crate::error::CacheError(format!("encoding sample for {entity}: {e}"))
            })?;
            self.cache
                .set_with_ttl(&sentiment_cache_key(&entity), payload, self.cfg.sample_ttl)
                .await?;
            counter!("aggregate_samples_written_total").increment(1);
            report.written.push(sample);
        }

        gauge!("aggregate_last_run_ts").set(now as f64);
        info!(
            target: "aggregate",
            written = report.written.len(),
            insufficient = report.insufficient.len(),
            "aggregation finished"
        );
        Ok(report)
    }

    /// Drop buffered scores older than the window, stale samples and expired cache entries.
    pub async fn cleanup(&self) -> Result<usize, PipelineError> {
        self.cleanup_at(now_unix()).await
    }

    pub async fn cleanup_at(&self, now: u64) -> Result<usize, PipelineError> {
        let cutoff = now.saturating_sub(self.cfg.window.as_secs());
        let buffered = {
            let mut buf = self.buffer.lock();
            let before = buf.len();
            buf.retain(|s| s.at >= cutoff);
            before - buf.len()
        };
        let samples = self.store.prune(cutoff).await?;
        let cached = self.cache.purge_expired().await?;
        info!(target: "aggregate", buffered, samples, cached, "cleanup finished");
        Ok(buffered + samples + cached)
    }
}

pub(crate) fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

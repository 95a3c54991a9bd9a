//! Bounded bridge to the external analysis program.
//!
//! Every call resolves within the configured deadline (plus a small kill
//! grace) to either the external result or a synthesized fallback. Successful
//! payloads go to the shared cache under [`analysis_cache_key`]; fallbacks are
//! only memoized in-process for a short while so a broken analyzer is not
//! hammered, and never poison the shared cache.

pub mod fallback;
pub mod process;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::error::PipelineError;
pub use process::{ExternalAnalyzer, ProcessAnalyzer};

/// Extra time past the deadline allowed for killing and reaping the child.
pub const KILL_GRACE: Duration = Duration::from_millis(250);

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("bridge_dispatch_total", "External analysis invocations.");
        describe_counter!(
            "bridge_outcome_total",
            "Bridge results by outcome (succeeded, failed, timed_out, cache_hit, memo_hit)."
        );
        describe_counter!("bridge_cache_hits_total", "Analyses served from the shared cache.");
        describe_histogram!("bridge_run_ms", "External analysis wall time in milliseconds.");
    });
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("analysis process i/o: {0}")]
    Io(#[source] std::io::Error),

    #[error("analysis process exited with {status}")]
    Exit { status: String },

    #[error("analysis output is not a JSON object: {0}")]
    Malformed(String),

    #[error("analysis exceeded its {0:?} deadline")]
    TimedOut(Duration),

    #[error("analysis cancelled")]
    Cancelled,
}

impl From<BridgeError> for PipelineError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::TimedOut(d) => PipelineError::ExternalAnalysisTimedOut(d),
            other => PipelineError::ExternalAnalysisFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityInsight {
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// What the analysis program prints: one JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalAnalysis {
    #[serde(default, alias = "confidence_score")]
    pub confidence: f64,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityInsight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

fn unit(x: f64, lo: f64) -> f64 {
    if x.is_finite() {
        x.clamp(lo, 1.0)
    } else {
        0.0
    }
}

impl ExternalAnalysis {
    /// Parse analyzer stdout. The whole output, trimmed, must be one JSON object.
    pub fn parse(stdout: &str) -> Result<Self, BridgeError> {
        let value: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|e| BridgeError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(BridgeError::Malformed("expected a JSON object".into()));
        }
        let parsed: ExternalAnalysis =
            serde_json::from_value(value).map_err(|e| BridgeError::Malformed(e.to_string()))?;
        Ok(parsed.sanitized())
    }

    fn sanitized(self) -> Self {
        let entities = self
            .entities
            .into_iter()
            .map(|(k, mut v)| {
                v.sentiment = unit(v.sentiment, -1.0);
                v.confidence = unit(v.confidence, 0.0);
                (k.trim().to_uppercase(), v)
            })
            .collect();
        Self {
            confidence: unit(self.confidence, 0.0),
            entities,
            summary: self.summary,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    External,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// One dispatch of the external analyzer.
#[derive(Debug, Clone)]
pub struct BridgeInvocation {
    pub request_key: String,
    pub deadline: Instant,
    pub state: InvocationState,
}

#[derive(Debug, Clone)]
pub struct BridgeOutcome {
    pub analysis: ExternalAnalysis,
    /// Canonical JSON of `analysis`; identical bytes on every cache hit.
    pub payload: String,
    pub source: ResultSource,
    /// Served without a dispatch (shared cache or fallback memo).
    pub cached: bool,
    pub invocation: Option<BridgeInvocation>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeConfig {
    pub deadline: Duration,
    pub cache_ttl: Duration,
    pub fallback_memo: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(15),
            cache_ttl: Duration::from_secs(300),
            fallback_memo: Duration::from_secs(30),
        }
    }
}

/// `analysis:` + sorted, upper-cased, de-duplicated symbols.
pub fn analysis_cache_key(entities: &[String]) -> String {
    let set: BTreeSet<String> = entities
        .iter()
        .map(|e| e.trim().to_uppercase())
        .filter(|e| !e.is_empty())
        .collect();
    let joined: Vec<String> = set.into_iter().collect();
    format!("analysis:{}", joined.join(","))
}

struct Memo {
    stored_at: Instant,
    analysis: ExternalAnalysis,
    payload: String,
}

pub struct AnalysisBridge {
    analyzer: Arc<dyn ExternalAnalyzer>,
    cache: Arc<dyn Cache>,
    cfg: BridgeConfig,
    memo: Mutex<HashMap<String, Memo>>,
    dispatches: AtomicU64,
    shutdown: CancellationToken,
}

impl AnalysisBridge {
    pub fn new(analyzer: Arc<dyn ExternalAnalyzer>, cache: Arc<dyn Cache>, cfg: BridgeConfig) -> Self {
        ensure_metrics_described();
        Self {
            analyzer,
            cache,
            cfg,
            memo: Mutex::new(HashMap::new()),
            dispatches: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    /// How many times the analyzer was actually invoked.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Cancel in-flight runs; later calls resolve to fallbacks immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn analyze(&self, entities: &[String]) -> BridgeOutcome {
        let key = analysis_cache_key(entities);
        if let Some(hit) = self.from_cache(&key).await {
            return hit;
        }
        if let Some(hit) = self.from_memo(&key) {
            return hit;
        }
        self.dispatch(entities, key).await
    }

    async fn from_cache(&self, key: &str) -> Option<BridgeOutcome> {
        let payload = match self.cache.get(key).await {
            Ok(Some(p)) => p,
            Ok(None) => return None,
            Err(e) => {
                warn!(target: "bridge", key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<ExternalAnalysis>(&payload) {
            Ok(analysis) => {
                counter!("bridge_cache_hits_total").increment(1);
                counter!("bridge_outcome_total", "outcome" => "cache_hit").increment(1);
                debug!(target: "bridge", key, "analysis cache hit");
                Some(BridgeOutcome {
                    analysis,
                    payload,
                    source: ResultSource::External,
                    cached: true,
                    invocation: None,
                })
            }
            Err(e) => {
                warn!(target: "bridge", key, error = %e, "unreadable cached analysis; ignoring");
                None
            }
        }
    }

    fn from_memo(&self, key: &str) -> Option<BridgeOutcome> {
        let mut memo = self.memo.lock();
        let fresh = memo
            .get(key)
            .map(|m| m.stored_at.elapsed() <= self.cfg.fallback_memo)?;
        if !fresh {
            memo.remove(key);
            return None;
        }
        let m = memo.get(key)?;
        counter!("bridge_outcome_total", "outcome" => "memo_hit").increment(1);
        Some(BridgeOutcome {
            analysis: m.analysis.clone(),
            payload: m.payload.clone(),
            source: ResultSource::Fallback,
            cached: true,
            invocation: None,
        })
    }

    async fn dispatch(&self, entities: &[String], key: String) -> BridgeOutcome {
        let started = Instant::now();
        let deadline = started + self.cfg.deadline;
        let mut invocation = BridgeInvocation {
            request_key: key.clone(),
            deadline,
            state: InvocationState::Running,
        };
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        counter!("bridge_dispatch_total").increment(1);
        info!(
            target: "bridge",
            key = %key,
            analyzer = self.analyzer.name(),
            deadline_ms = self.cfg.deadline.as_millis() as u64,
            "dispatching external analysis"
        );

        let cancel = self.shutdown.child_token();
        let run = self.analyzer.run(entities, deadline, cancel.clone());
        let res = tokio::select! {
            r = run => r,
            _ = tokio::time::sleep_until(deadline + KILL_GRACE) => {
                cancel.cancel();
                Err(BridgeError::TimedOut(self.cfg.deadline))
            }
        };
        let res = res.and_then(|stdout| ExternalAnalysis::parse(&stdout));
        histogram!("bridge_run_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        match res {
            Ok(analysis) => {
                invocation.state = InvocationState::Succeeded;
                counter!("bridge_outcome_total", "outcome" => "succeeded").increment(1);
                let payload = canonical(&analysis);
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&key, payload.clone(), self.cfg.cache_ttl)
                    .await
                {
                    warn!(target: "bridge", key = %key, error = %e, "cache write failed");
                }
                BridgeOutcome {
                    analysis,
                    payload,
                    source: ResultSource::External,
                    cached: false,
                    invocation: Some(invocation),
                }
            }
            Err(e) => {
                let (state, outcome) = match e {
                    BridgeError::TimedOut(_) => (InvocationState::TimedOut, "timed_out"),
                    _ => (InvocationState::Failed, "failed"),
                };
                invocation.state = state;
                counter!("bridge_outcome_total", "outcome" => outcome).increment(1);
                let err = PipelineError::from(e);
                warn!(target: "bridge", key = %key, error = %err, "external analysis unusable; using fallback");

                let analysis = fallback::synthesize(entities, outcome, &mut rand::rng());
                let payload = canonical(&analysis);
                {
                    let mut memo = self.memo.lock();
                    let ttl = self.cfg.fallback_memo;
                    memo.retain(|_, m| m.stored_at.elapsed() <= ttl);
                    memo.insert(
                        key,
                        Memo {
                            stored_at: Instant::now(),
                            analysis: analysis.clone(),
                            payload: payload.clone(),
                        },
                    );
                }
                BridgeOutcome {
                    analysis,
                    payload,
                    source: ResultSource::Fallback,
                    cached: false,
                    invocation: Some(invocation),
                }
            }
        }
    }
}

fn canonical(analysis: &ExternalAnalysis) -> String {
    serde_json::to_string(analysis).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::error::CacheError;
    use async_trait::async_trait;

    type Reply = Box<dyn Fn() -> Result<String, BridgeError> + Send + Sync>;

    /// Ignores the deadline on purpose so the bridge's own bound is exercised.
    struct Stub {
        delay: Duration,
        reply: Reply,
    }

    #[async_trait]
    impl ExternalAnalyzer for Stub {
        async fn run(
            &self,
            _entities: &[String],
            _deadline: Instant,
            cancel: CancellationToken,
        ) -> Result<String, BridgeError> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => (self.reply)(),
                _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            }
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct DownCache;

    #[async_trait]
    impl Cache for DownCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError("connection refused".into()))
        }
        async fn set_with_ttl(&self, _k: &str, _p: String, _t: Duration) -> Result<(), CacheError> {
            Err(CacheError("connection refused".into()))
        }
        async fn purge_expired(&self) -> Result<usize, CacheError> {
            Ok(0)
        }
    }

    const GOOD: &str = r#"{"confidence_score":0.8,"entities":{"btc":{"sentiment":0.4,"confidence":0.7,"outlook":"bullish"}}}"#;

    fn bridge(stub: Stub, cache: Arc<dyn Cache>) -> AnalysisBridge {
        AnalysisBridge::new(Arc::new(stub), cache, BridgeConfig {
            deadline: Duration::from_secs(2),
            ..Default::default()
        })
    }

    fn ents() -> Vec<String> {
        vec!["BTC".into()]
    }

    #[test]
    fn cache_key_is_order_and_case_insensitive() {
        let a = analysis_cache_key(&["eth".into(), "BTC".into()]);
        let b = analysis_cache_key(&["btc".into(), "ETH".into(), "eth".into()]);
        assert_eq!(a, "analysis:BTC,ETH");
        assert_eq!(a, b);
    }

    #[test]
    fn parse_accepts_alias_and_surrounding_whitespace() {
        let a = ExternalAnalysis::parse(GOOD).unwrap();
        assert_eq!(a.confidence, 0.8);
        assert!(a.entities.contains_key("BTC"));
        assert_eq!(ExternalAnalysis::parse(&format!("\n  {GOOD}\n")).unwrap(), a);
    }

    #[test]
    fn parse_rejects_log_lines_before_the_object() {
        let noisy = "Starting engine...\nAnalysis completed\n{\"confidence\":0.9}\n";
        assert!(matches!(ExternalAnalysis::parse(noisy), Err(BridgeError::Malformed(_))));
        let trailing = format!("{GOOD}\ndone\n");
        assert!(matches!(ExternalAnalysis::parse(&trailing), Err(BridgeError::Malformed(_))));
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(ExternalAnalysis::parse("hello"), Err(BridgeError::Malformed(_))));
        assert!(matches!(ExternalAnalysis::parse("[1,2]"), Err(BridgeError::Malformed(_))));
        assert!(matches!(ExternalAnalysis::parse(""), Err(BridgeError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_cached_and_replayed_byte_identical() {
        let cache = Arc::new(InMemoryCache::new());
        let b = bridge(
            Stub {
                delay: Duration::from_millis(100),
                reply: Box::new(|| Ok(GOOD.to_string())),
            },
            cache.clone(),
        );
        let first = b.analyze(&ents()).await;
        assert_eq!(first.source, ResultSource::External);
        assert!(!first.cached);
        assert_eq!(first.invocation.as_ref().map(|i| i.state), Some(InvocationState::Succeeded));

        let second = b.analyze(&ents()).await;
        assert!(second.cached);
        assert_eq!(second.payload, first.payload);
        assert_eq!(b.dispatch_count(), 1);
        assert!(cache.get("analysis:BTC").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_analyzer_resolves_to_fallback_within_deadline() {
        let cache = Arc::new(InMemoryCache::new());
        let b = bridge(
            Stub {
                delay: Duration::from_secs(60),
                reply: Box::new(|| Ok(GOOD.to_string())),
            },
            cache.clone(),
        );
        let start = Instant::now();
        let out = b.analyze(&ents()).await;
        assert!(start.elapsed() <= Duration::from_secs(2) + KILL_GRACE);
        assert_eq!(out.source, ResultSource::Fallback);
        assert_eq!(out.invocation.map(|i| i.state), Some(InvocationState::TimedOut));
        assert!(out.analysis.entities.contains_key("BTC"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_is_memoized_then_retried() {
        let cache = Arc::new(InMemoryCache::new());
        let b = bridge(
            Stub {
                delay: Duration::ZERO,
                reply: Box::new(|| Ok("not json".into())),
            },
            cache.clone(),
        );
        let first = b.analyze(&ents()).await;
        assert_eq!(first.source, ResultSource::Fallback);
        assert_eq!(first.invocation.map(|i| i.state), Some(InvocationState::Failed));

        let memo = b.analyze(&ents()).await;
        assert!(memo.cached);
        assert_eq!(memo.payload, first.payload);
        assert_eq!(b.dispatch_count(), 1);
        assert!(cache.get("analysis:BTC").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        let retried = b.analyze(&ents()).await;
        assert!(!retried.cached);
        assert_eq!(b.dispatch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_fallbacks_are_dropped_when_new_ones_land() {
        let b = bridge(
            Stub {
                delay: Duration::ZERO,
                reply: Box::new(|| Err(BridgeError::Exit { status: "exit status: 1".into() })),
            },
            Arc::new(InMemoryCache::new()),
        );
        b.analyze(&ents()).await;
        b.analyze(&["ETH".to_string()]).await;
        assert_eq!(b.memo.lock().len(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        let out = b.analyze(&["sol".to_string()]).await;
        assert_eq!(out.source, ResultSource::Fallback);
        assert!(out.analysis.entities.contains_key("SOL"));
        let memo = b.memo.lock();
        assert_eq!(memo.len(), 1);
        assert!(memo.contains_key("analysis:SOL"));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_cache_is_a_miss_not_an_error() {
        let b = bridge(
            Stub {
                delay: Duration::ZERO,
                reply: Box::new(|| Ok(GOOD.to_string())),
            },
            Arc::new(DownCache),
        );
        let out = b.analyze(&ents()).await;
        assert_eq!(out.source, ResultSource::External);
        let again = b.analyze(&ents()).await;
        assert!(!again.cached);
        assert_eq!(b.dispatch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_in_flight_run() {
        let b = Arc::new(bridge(
            Stub {
                delay: Duration::from_secs(60),
                reply: Box::new(|| Ok(GOOD.to_string())),
            },
            Arc::new(InMemoryCache::new()),
        ));
        let b2 = b.clone();
        let task = tokio::spawn(async move { b2.analyze(&["ETH".to_string()]).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.shutdown();
        let out = task.await.unwrap();
        assert_eq!(out.source, ResultSource::Fallback);
        assert_eq!(out.invocation.map(|i| i.state), Some(InvocationState::Failed));
    }

    #[test]
    fn timeouts_map_to_their_own_pipeline_error() {
        let e: PipelineError = BridgeError::TimedOut(Duration::from_secs(15)).into();
        assert!(matches!(e, PipelineError::ExternalAnalysisTimedOut(_)));
        let e: PipelineError = BridgeError::Malformed("x".into()).into();
        assert!(matches!(e, PipelineError::ExternalAnalysisFailed(_)));
    }
}

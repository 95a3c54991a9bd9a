//! One fetcher per source: rate limit, bounded request time, failure isolation.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{RawRecord, Source, SourceProvider};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SourceFetcher {
    source: Source,
    provider: Box<dyn SourceProvider>,
    limiter: RateLimiter,
    timeout: Duration,
}

impl SourceFetcher {
    pub fn new(source: Source, provider: Box<dyn SourceProvider>, timeout: Duration) -> Self {
        let limiter = RateLimiter::new(&source.id, source.rate_limit_per_window, source.window);
        Self {
            source,
            provider,
            limiter,
            timeout,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch once, surfacing why a source produced nothing.
    pub async fn try_fetch(&self) -> Result<Vec<RawRecord>, PipelineError> {
        self.limiter.acquire().await?;

        let t0 = std::time::Instant::now();
        let res = tokio::time::timeout(self.timeout, self.provider.fetch_latest()).await;
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        match res {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(e)) => Err(PipelineError::SourceUnavailable {
                source_id: self.source.id.clone(),
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(PipelineError::SourceUnavailable {
                source_id: self.source.id.clone(),
                reason: format!("no response within {:?}", self.timeout),
            }),
        }
    }

    /// Fetch once; any failure is logged and counted as zero records.
    pub async fn fetch(&self) -> Vec<RawRecord> {
        match self.try_fetch().await {
            Ok(records) => {
                debug!(
                    target: "ingest",
                    source = %self.source.id,
                    provider = self.provider.name(),
                    records = records.len(),
                    "fetched"
                );
                records
            }
            Err(e) => {
                warn!(target: "ingest", source = %self.source.id, error = %e, "source skipped this cycle");
                counter!("ingest_source_errors_total").increment(1);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Flaky {
        calls: Arc<AtomicUsize>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SourceProvider for Flaky {
        async fn fetch_latest(&self) -> anyhow::Result<Vec<RawRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(anyhow!("upstream 503"));
            }
            Ok(vec![RawRecord::tick("flaky", "BTC", 1, 1.0, 1.0)])
        }
        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn source(limit: u32) -> Source {
        Source {
            id: "flaky".into(),
            kind: SourceKind::PriceFeed,
            endpoint: "http://localhost".into(),
            rate_limit_per_window: limit,
            window: Duration::from_secs(60),
            api_key_env: None,
            entity: Some("BTC".into()),
        }
    }

    fn fetcher(fail: bool, delay: Duration, limit: u32) -> (SourceFetcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = Flaky {
            calls: calls.clone(),
            fail,
            delay,
        };
        (
            SourceFetcher::new(source(limit), Box::new(p), Duration::from_secs(30)),
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failure_becomes_zero_records() {
        let (f, calls) = fetcher(true, Duration::ZERO, 10);
        assert!(f.fetch().await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            f.try_fetch().await,
            Err(PipelineError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_is_cut_at_timeout() {
        let (f, _) = fetcher(false, Duration::from_secs(120), 10);
        let start = tokio::time::Instant::now();
        assert!(f.fetch().await.is_empty());
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn every_call_goes_through_the_limiter() {
        let (f, calls) = fetcher(false, Duration::ZERO, 2);
        assert_eq!(f.fetch().await.len(), 1);
        assert_eq!(f.fetch().await.len(), 1);
        assert_eq!(f.limiter().request_count(), 2);

        let start = tokio::time::Instant::now();
        assert_eq!(f.fetch().await.len(), 1);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

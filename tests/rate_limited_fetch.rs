// tests/rate_limited_fetch.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use market_signal_pipeline::ingest::fetcher::SourceFetcher;
use market_signal_pipeline::ingest::run_once;
use market_signal_pipeline::ingest::types::{RawRecord, Source, SourceKind, SourceProvider};
use tokio::time::Instant;

/// Counts calls and returns one tick per call with a fresh timestamp.
struct CountingFeed {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceProvider for CountingFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(vec![RawRecord::tick("feed", "BTC", 1_000 + n, 100.0, 1.0)])
    }
    fn name(&self) -> &str {
        "counting"
    }
}

fn fetcher(limit: u32, calls: Arc<AtomicUsize>) -> SourceFetcher {
    let source = Source {
        id: "feed".into(),
        kind: SourceKind::PriceFeed,
        endpoint: "fixture://feed".into(),
        rate_limit_per_window: limit,
        window: Duration::from_secs(60),
        api_key_env: None,
        entity: Some("BTC".into()),
    };
    SourceFetcher::new(source, Box::new(CountingFeed { calls }), Duration::from_secs(5))
}

#[tokio::test(start_paused = true)]
async fn third_poll_waits_for_the_next_window() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetchers = vec![fetcher(2, calls.clone())];

    let start = Instant::now();
    assert_eq!(run_once(&fetchers, 4).await.len(), 1);
    assert_eq!(run_once(&fetchers, 4).await.len(), 1);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(fetchers[0].limiter().request_count(), 2);

    // blocked until the 60 s window rolls over, then counted in the new one
    assert_eq!(run_once(&fetchers, 4).await.len(), 1);
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert!(start.elapsed() < Duration::from_secs(61));
    assert_eq!(fetchers[0].limiter().request_count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn limiter_never_exceeds_its_budget_within_a_window() {
    let calls = Arc::new(AtomicUsize::new(0));
    let f = fetcher(3, calls.clone());
    for _ in 0..3 {
        assert!(f.try_fetch().await.is_ok());
    }
    assert!(!f.limiter().try_acquire());
    assert_eq!(f.limiter().request_count(), 3);
    assert_eq!(f.limiter().wait_time(), Duration::from_secs(60));
}

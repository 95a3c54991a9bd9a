//! Fixed-window rate limiter, one instance per source.
//!
//! Each source owns its limiter; the fetcher for that source is the only
//! writer. The window is reset lazily on the next acquisition once
//! `now - window_start >= window`.

use metrics::counter;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::PipelineError;

#[derive(Debug)]
pub struct RateLimiter {
    source_id: String,
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    request_count: u32,
}

impl WindowState {
    fn roll(&mut self, now: Instant, window: Duration) {
        if now.saturating_duration_since(self.window_start) >= window {
            self.window_start = now;
            self.request_count = 0;
        }
    }
}

impl RateLimiter {
    /// `limit` is clamped to at least one request per window.
    pub fn new(source_id: impl Into<String>, limit: u32, window: Duration) -> Self {
        Self {
            source_id: source_id.into(),
            limit: limit.max(1),
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                request_count: 0,
            }),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Take one slot if the current window still has room.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut st = self.state.lock();
        st.roll(now, self.window);
        if st.request_count < self.limit {
            st.request_count += 1;
            true
        } else {
            false
        }
    }

    /// How long until the next slot frees up. Zero if one is free now.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let st = self.state.lock();
        let elapsed = now.saturating_duration_since(st.window_start);
        if elapsed >= self.window || st.request_count < self.limit {
            Duration::ZERO
        } else {
            self.window - elapsed
        }
    }

    /// Requests counted in the current window.
    pub fn request_count(&self) -> u32 {
        let mut st = self.state.lock();
        st.roll(Instant::now(), self.window);
        st.request_count
    }

    /// Acquire a slot, sleeping at most once for the rest of the window.
    ///
    /// After the single wait the window has elapsed, so the retry resets it
    /// and counts. A retry can only fail if another writer raced for the
    /// same limiter, which the one-fetcher-per-source layout rules out.
    pub async fn acquire(&self) -> Result<(), PipelineError> {
        if self.try_acquire() {
            return Ok(());
        }

        let wait = self.wait_time();
        counter!("ingest_rate_limited_total").increment(1);
        debug!(
            target: "ingest",
            source = %self.source_id,
            wait_ms = wait.as_millis() as u64,
            "rate limit reached, waiting for window"
        );
        tokio::time::sleep(wait).await;

        if self.try_acquire() {
            Ok(())
        } else {
            Err(PipelineError::RateLimited {
                source_id: self.source_id.clone(),
                wait: self.wait_time(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grants_up_to_limit_then_refuses() {
        let rl = RateLimiter::new("news", 3, Duration::from_secs(60));
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        assert!(!rl.try_acquire());
        assert_eq!(rl.request_count(), 3);
        assert_eq!(rl.wait_time(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_elapsed() {
        let rl = RateLimiter::new("news", 1, Duration::from_secs(10));
        assert!(rl.try_acquire());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!rl.try_acquire());
        assert_eq!(rl.wait_time(), Duration::from_secs(6));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(rl.try_acquire());
        assert_eq!(rl.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocks_for_remaining_window_then_counts() {
        let window = Duration::from_secs(30);
        let rl = RateLimiter::new("social", 2, window);
        rl.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        rl.acquire().await.unwrap();

        let start = Instant::now();
        rl.acquire().await.unwrap();
        let waited = start.elapsed();

        assert!(waited >= Duration::from_secs(25), "waited only {waited:?}");
        assert!(waited < window);
        assert_eq!(rl.request_count(), 1);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let rl = RateLimiter::new("x", 0, Duration::from_secs(1));
            assert!(rl.try_acquire());
        });
    }
}

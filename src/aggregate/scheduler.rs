// src/aggregate/scheduler.rs
//! One ticker per duty. Each duty runs in its own task, so a slow ingest
//! never pushes back re-aggregation or cleanup.

use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Duty {
    Ingest,
    Aggregate,
    Cleanup,
}

impl Duty {
    pub fn name(self) -> &'static str {
        match self {
            Duty::Ingest => "ingest",
            Duty::Aggregate => "aggregate",
            Duty::Cleanup => "cleanup",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ScheduleCfg {
    pub ingest_every: Duration,
    pub aggregate_every: Duration,
    pub cleanup_every: Duration,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        Self {
            ingest_every: Duration::from_secs(600),
            aggregate_every: Duration::from_secs(900),
            cleanup_every: Duration::from_secs(86_400),
        }
    }
}

/// Run `job` every `period` until `cancel` fires. The first run is immediate.
/// A run that overlaps the next tick delays only this duty.
pub fn spawn_duty<F, Fut>(
    duty: Duty,
    period: Duration,
    cancel: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            counter!("scheduler_runs_total", "duty" => duty.name()).increment(1);
            let res = tokio::select! {
                _ = cancel.cancelled() => break,
                res = job() => res,
            };
            if let Err(e) = res {
                tracing::warn!(target: "aggregate", duty = duty.name(), error = ?e, "duty failed");
                counter!("scheduler_failures_total", "duty" => duty.name()).increment(1);
            }
        }
        tracing::debug!(target: "aggregate", duty = duty.name(), "duty stopped");
    })
}

/// The three aggregator duties running on their own tickers.
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<(Duty, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn start(aggregator: Arc<Aggregator>, entities: Vec<String>, cfg: ScheduleCfg) -> Self {
        let cancel = CancellationToken::new();
        let entities = Arc::new(entities);
        let mut handles = Vec::with_capacity(3);

        {
            let (agg, ents) = (aggregator.clone(), entities.clone());
            handles.push((
                Duty::Ingest,
                spawn_duty(Duty::Ingest, cfg.ingest_every, cancel.child_token(), move || {
                    let (agg, ents) = (agg.clone(), ents.clone());
                    async move {
                        agg.ingest(&ents).await?;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            ));
        }
        {
            let (agg, ents) = (aggregator.clone(), entities.clone());
            handles.push((
                Duty::Aggregate,
                spawn_duty(
                    Duty::Aggregate,
                    cfg.aggregate_every,
                    cancel.child_token(),
                    move || {
                        let (agg, ents) = (agg.clone(), ents.clone());
                        async move {
                            agg.aggregate(&ents).await?;
                            Ok::<(), anyhow::Error>(())
                        }
                    },
                ),
            ));
        }
        {
            let agg = aggregator;
            handles.push((
                Duty::Cleanup,
                spawn_duty(Duty::Cleanup, cfg.cleanup_every, cancel.child_token(), move || {
                    let agg = agg.clone();
                    async move {
                        agg.cleanup().await?;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            ));
        }

        tracing::info!(
            target: "aggregate",
            ingest_s = cfg.ingest_every.as_secs(),
            aggregate_s = cfg.aggregate_every.as_secs(),
            cleanup_s = cfg.cleanup_every.as_secs(),
            "scheduler started"
        );
        Self { cancel, handles }
    }

    pub fn duties(&self) -> Vec<Duty> {
        self.handles.iter().map(|(d, _)| *d).collect()
    }

    /// Stop all duties and wait for their tasks to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (duty, h) in self.handles {
            if let Err(e) = h.await {
                tracing::warn!(target: "aggregate", duty = duty.name(), error = ?e, "duty task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        duty: Duty,
        period: Duration,
        work: Duration,
        cancel: &CancellationToken,
    ) -> (Arc<AtomicUsize>, JoinHandle<()>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let h = spawn_duty(duty, period, cancel.clone(), move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                Ok::<(), anyhow::Error>(())
            }
        });
        (runs, h)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_duty_does_not_delay_others() {
        let cancel = CancellationToken::new();
        // ingest takes longer than two of its own periods
        let (ingest, _h1) = counting(
            Duty::Ingest,
            Duration::from_secs(600),
            Duration::from_secs(1_500),
            &cancel,
        );
        let (aggregate, _h2) = counting(
            Duty::Aggregate,
            Duration::from_secs(900),
            Duration::ZERO,
            &cancel,
        );

        tokio::time::sleep(Duration::from_secs(3_650)).await;

        // aggregate ran at 0, 900, 1800, 2700, 3600
        assert_eq!(aggregate.load(Ordering::SeqCst), 5);
        // ingest ran back to back: 0, 1500, 3000
        assert_eq!(ingest.load(Ordering::SeqCst), 3);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_duty_keeps_its_cadence() {
        let cancel = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let h = spawn_duty(Duty::Cleanup, Duration::from_secs(60), cancel.clone(), move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("store unreachable"))
            }
        });
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        cancel.cancel();
        h.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_each_duty_and_stops() {
        use crate::aggregate::{Aggregator, AggregatorCfg};
        use crate::cache::InMemoryCache;
        use crate::store::InMemoryStore;

        let agg = Arc::new(Aggregator::new(
            Vec::new(),
            Arc::new(InMemoryStore::default()),
            Arc::new(InMemoryCache::new()),
            AggregatorCfg::default(),
        ));
        let sched = Scheduler::start(agg, vec!["BTC".into()], ScheduleCfg::default());
        assert_eq!(
            sched.duties(),
            vec![Duty::Ingest, Duty::Aggregate, Duty::Cleanup]
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        sched.shutdown().await;
    }
}

use anyhow::{anyhow, Context, Result};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::bridge::BridgeConfig;

pub const ENV_METRICS_ADDR: &str = "METRICS_ADDR";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the bridge bounds as static
    /// gauges. With `listen` set the exporter serves its own scrape endpoint;
    /// this must run inside a Tokio runtime.
    pub fn init(listen: Option<SocketAddr>, bridge: &BridgeConfig) -> Result<Self> {
        let handle = match listen {
            Some(addr) => {
                let (recorder, exporter) = PrometheusBuilder::new()
                    .with_http_listener(addr)
                    .build()
                    .context("prometheus: build exporter")?;
                let handle = recorder.handle();
                metrics::set_global_recorder(recorder)
                    .map_err(|_| anyhow!("prometheus: a metrics recorder is already installed"))?;
                tokio::spawn(async move {
                    // `ExporterError` implements neither `Debug` nor `Display`.
                    if exporter.await.is_err() {
                        warn!("prometheus exporter stopped");
                    }
                });
                info!(%addr, "serving prometheus metrics");
                handle
            }
            None => PrometheusBuilder::new()
                .install_recorder()
                .context("prometheus: install recorder")?,
        };

        gauge!("bridge_deadline_ms").set(bridge.deadline.as_millis() as f64);
        gauge!("bridge_cache_ttl_secs").set(bridge.cache_ttl.as_secs_f64());

        Ok(Self { handle })
    }

    /// `METRICS_ADDR` as a socket address; unset or blank means no listener.
    pub fn listen_addr_from_env() -> Result<Option<SocketAddr>> {
        match std::env::var(ENV_METRICS_ADDR) {
            Ok(v) if !v.trim().is_empty() => v
                .trim()
                .parse()
                .map(Some)
                .with_context(|| format!("{ENV_METRICS_ADDR}={v} is not a socket address")),
            _ => Ok(None),
        }
    }

    /// Current exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

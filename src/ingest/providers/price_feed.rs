use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use tracing::debug;

use super::{epoch_to_secs, Auth, Mode};
use crate::ingest::types::{RawRecord, SourceProvider};

/// CoinGecko `market_chart`, a bare tick array, or `{ "ticks": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Chart {
        prices: Vec<(f64, f64)>,
        #[serde(default)]
        total_volumes: Vec<(f64, f64)>,
    },
    Flat(Vec<Tick>),
    Wrapped {
        ticks: Vec<Tick>,
    },
}

#[derive(Debug, Deserialize)]
struct Tick {
    timestamp: f64,
    price: f64,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default)]
    low: Option<f64>,
}

pub struct PriceFeedProvider {
    source_id: String,
    entity: String,
    mode: Mode,
}

impl PriceFeedProvider {
    pub(crate) fn new(source_id: &str, entity: &str, mode: Mode) -> Self {
        Self {
            source_id: source_id.to_string(),
            entity: entity.trim().to_ascii_uppercase(),
            mode,
        }
    }

    pub fn from_fixture(source_id: &str, entity: &str, body: &str) -> Self {
        Self::new(source_id, entity, Mode::Fixture(body.to_string()))
    }

    fn parse(&self, body: &str) -> Result<Vec<RawRecord>> {
        let t0 = std::time::Instant::now();
        let env: Envelope = serde_json::from_str(body)
            .with_context(|| format!("parsing {} price json", self.source_id))?;

        let ticks: Vec<Tick> = match env {
            Envelope::Chart {
                prices,
                total_volumes,
            } => prices
                .into_iter()
                .enumerate()
                .map(|(i, (ts, price))| Tick {
                    timestamp: ts,
                    price,
                    // volumes share the price timestamps index for index
                    volume: total_volumes.get(i).map(|v| v.1).unwrap_or(0.0),
                    high: None,
                    low: None,
                })
                .collect(),
            Envelope::Flat(ticks) | Envelope::Wrapped { ticks } => ticks,
        };

        let mut out = Vec::with_capacity(ticks.len());
        let mut dropped = 0u64;
        for t in ticks {
            let at = epoch_to_secs(t.timestamp);
            if at == 0 || !t.price.is_finite() || t.price <= 0.0 {
                dropped += 1;
                continue;
            }
            let mut rec = RawRecord::tick(&self.source_id, &self.entity, at, t.price, t.volume.max(0.0));
            rec.high = t.high.filter(|h| h.is_finite() && *h >= t.price);
            rec.low = t.low.filter(|l| l.is_finite() && *l <= t.price && *l > 0.0);
            out.push(rec);
        }
        out.sort_by_key(|r| r.published_at);

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total").increment(out.len() as u64);
        if dropped > 0 {
            debug!(target: "ingest", source = %self.source_id, dropped, "unusable ticks skipped");
            counter!("ingest_dropped_total").increment(dropped);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for PriceFeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        let body = self
            .mode
            .body(&self.source_id, Auth::Header("x-cg-demo-api-key"))
            .await?;
        self.parse(&body)
    }

    fn name(&self) -> &str {
        &self.source_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coingecko_chart_pairs_prices_with_volumes() {
        let body = r#"{"prices":[[1704067260000,42100.5],[1704067200000,42000.0]],
                       "total_volumes":[[1704067260000,10.0],[1704067200000,12.0]]}"#;
        let p = PriceFeedProvider::from_fixture("coingecko-btc", "btc", body);
        let recs = p.fetch_latest().await.unwrap();
        assert_eq!(recs.len(), 2);
        // sorted ascending by time
        assert_eq!(recs[0].published_at, 1_704_067_200);
        assert_eq!(recs[0].price, Some(42000.0));
        assert_eq!(recs[0].volume, Some(12.0));
        assert_eq!(recs[0].entity_tags, vec!["BTC"]);
    }

    #[tokio::test]
    async fn flat_ticks_keep_valid_high_low_only() {
        let body = r#"[{"timestamp":1704067200,"price":10.0,"volume":5,"high":11.0,"low":12.0},
                       {"timestamp":1704067260,"price":-1.0}]"#;
        let p = PriceFeedProvider::from_fixture("ticks", "ETH", body);
        let recs = p.fetch_latest().await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].high, Some(11.0));
        assert_eq!(recs[0].low, None);
    }

    #[tokio::test]
    async fn ticks_without_a_usable_timestamp_are_skipped() {
        let body = r#"[{"timestamp":0,"price":10.0},
                       {"timestamp":-5,"price":10.5},
                       {"timestamp":1704067200,"price":11.0},
                       {"timestamp":1704067260,"price":11.5}]"#;
        let p = PriceFeedProvider::from_fixture("ticks", "ETH", body);
        let recs = p.fetch_latest().await.unwrap();
        let at: Vec<u64> = recs.iter().map(|r| r.published_at).collect();
        assert_eq!(at, vec![1_704_067_200, 1_704_067_260]);
    }
}

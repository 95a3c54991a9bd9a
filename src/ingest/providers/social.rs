use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use std::sync::Arc;

use super::{epoch_to_secs, parse_rfc3339_to_unix, Auth, Mode};
use crate::ingest::normalize_text;
use crate::ingest::tags::EntityCatalog;
use crate::ingest::types::{RawRecord, SourceProvider};

/// Twitter v2 recent search or a Reddit listing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Twitter { data: Vec<Tweet> },
    Reddit { data: Listing },
}

#[derive(Debug, Deserialize)]
struct Tweet {
    text: String,
    created_at: Option<String>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
}

#[derive(Debug, Deserialize)]
struct Listing {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: Option<String>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    score: Option<i64>,
}

pub struct SocialProvider {
    source_id: String,
    mode: Mode,
    catalog: Arc<EntityCatalog>,
}

impl SocialProvider {
    pub(crate) fn new(source_id: &str, mode: Mode, catalog: Arc<EntityCatalog>) -> Self {
        Self {
            source_id: source_id.to_string(),
            mode,
            catalog,
        }
    }

    pub fn from_fixture(source_id: &str, body: &str, catalog: Arc<EntityCatalog>) -> Self {
        Self::new(source_id, Mode::Fixture(body.to_string()), catalog)
    }

    fn parse(&self, body: &str) -> Result<Vec<RawRecord>> {
        let t0 = std::time::Instant::now();
        let env: Envelope = serde_json::from_str(body)
            .with_context(|| format!("parsing {} social json", self.source_id))?;

        // (text, published_at, engagement)
        let items: Vec<(String, u64, u64)> = match env {
            Envelope::Twitter { data } => data
                .into_iter()
                .map(|t| {
                    let m = t.public_metrics.unwrap_or_default();
                    let ts = t.created_at.as_deref().map(parse_rfc3339_to_unix).unwrap_or(0);
                    (t.text, ts, m.like_count + m.retweet_count + m.reply_count)
                })
                .collect(),
            Envelope::Reddit { data } => data
                .children
                .into_iter()
                .map(|c| {
                    let p = c.data;
                    let text = format!(
                        "{} {}",
                        p.title.as_deref().unwrap_or_default(),
                        p.selftext.as_deref().unwrap_or_default()
                    );
                    let ts = p.created_utc.map(epoch_to_secs).unwrap_or(0);
                    (text, ts, p.score.unwrap_or(0).max(0) as u64)
                })
                .collect(),
        };

        let mut out = Vec::with_capacity(items.len());
        for (raw, ts, engagement) in items {
            let text = normalize_text(&raw);
            if text.is_empty() {
                continue;
            }
            let tags = self.catalog.extract(&text);
            let mut rec = RawRecord::text(&self.source_id, ts, text, tags);
            rec.engagement = Some(engagement);
            out.push(rec);
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for SocialProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        let body = self.mode.body(&self.source_id, Auth::Bearer).await?;
        self.parse(&body)
    }

    fn name(&self) -> &str {
        &self.source_id
    }
}

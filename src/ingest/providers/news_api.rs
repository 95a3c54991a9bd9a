use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use std::sync::Arc;

use super::{parse_rfc3339_to_unix, Auth, Mode};
use crate::ingest::normalize_text;
use crate::ingest::tags::EntityCatalog;
use crate::ingest::types::{RawRecord, SourceProvider};

/// NewsAPI `/v2/everything` or CryptoPanic `/posts` envelopes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    NewsApi { articles: Vec<Article> },
    CryptoPanic { results: Vec<PanicPost> },
}

#[derive(Debug, Deserialize)]
struct Article {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PanicPost {
    title: Option<String>,
    published_at: Option<String>,
}

pub struct NewsApiProvider {
    source_id: String,
    mode: Mode,
    catalog: Arc<EntityCatalog>,
}

impl NewsApiProvider {
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
            .with_context(|| format!("parsing {} news json", self.source_id))?;

        let items: Vec<(String, u64)> = match env {
            Envelope::NewsApi { articles } => articles
                .into_iter()
                .map(|a| {
                    let text = format!(
                        "{}. {}",
                        a.title.as_deref().unwrap_or_default(),
                        a.description.as_deref().unwrap_or_default()
                    );
                    let ts = a.published_at.as_deref().map(parse_rfc3339_to_unix).unwrap_or(0);
                    (text, ts)
                })
                .collect(),
            Envelope::CryptoPanic { results } => results
                .into_iter()
                .map(|p| {
                    let ts = p.published_at.as_deref().map(parse_rfc3339_to_unix).unwrap_or(0);
                    (p.title.unwrap_or_default(), ts)
                })
                .collect(),
        };

        let mut out = Vec::with_capacity(items.len());
        for (raw, ts) in items {
            let text = normalize_text(&raw);
            if text.is_empty() {
                continue;
            }
            let tags = self.catalog.extract(&text);
            out.push(RawRecord::text(&self.source_id, ts, text, tags));
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_records_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for NewsApiProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        let body = self.mode.body(&self.source_id, Auth::Header("X-Api-Key")).await?;
        self.parse(&body)
    }

    fn name(&self) -> &str {
        &self.source_id
    }
}

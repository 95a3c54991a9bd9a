// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of upstream feed; selects the envelope parser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    NewsApi,
    Social,
    PriceFeed,
    Rss,
}

/// Static description of one upstream source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub endpoint: String,
    /// Max requests allowed within one `window`.
    pub rate_limit_per_window: u32,
    #[serde(with = "secs")]
    pub window: Duration,
    /// Name of the env var holding the API key, if the source needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Entity the feed is about (price feeds are per-symbol).
    #[serde(default)]
    pub entity: Option<String>,
}

/// One normalized article, post or tick. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    pub source_id: String,
    pub entity_tags: Vec<String>,
    pub published_at: u64, // unix seconds
    pub text: Option<String>,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    /// Likes/retweets/score for social posts; scales sentiment confidence.
    #[serde(default)]
    pub engagement: Option<u64>,
}

impl RawRecord {
    pub fn text(source_id: &str, published_at: u64, text: String, tags: Vec<String>) -> Self {
        Self {
            source_id: source_id.to_string(),
            entity_tags: tags,
            published_at,
            text: Some(text),
            price: None,
            volume: None,
            high: None,
            low: None,
            engagement: None,
        }
    }

    pub fn tick(source_id: &str, entity: &str, published_at: u64, price: f64, volume: f64) -> Self {
        Self {
            source_id: source_id.to_string(),
            entity_tags: vec![entity.to_ascii_uppercase()],
            published_at,
            text: None,
            price: Some(price),
            volume: Some(volume),
            high: None,
            low: None,
            engagement: None,
        }
    }

    pub fn is_tagged(&self, entity: &str) -> bool {
        self.entity_tags.iter().any(|t| t.eq_ignore_ascii_case(entity))
    }
}

/// Fetches one upstream source and returns its records already normalized.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>>;
    fn name(&self) -> &str;
}

pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

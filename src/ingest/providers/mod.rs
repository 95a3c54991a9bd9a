// src/ingest/providers/mod.rs
pub mod news_api;
pub mod price_feed;
pub mod rss;
pub mod social;

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::tags::EntityCatalog;
use crate::ingest::types::{Source, SourceKind, SourceProvider};

/// Where a provider gets its body from.
pub(crate) enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        api_key: Option<String>,
    },
}

impl Mode {
    /// Fetch the raw body. `auth` decides how the API key is attached.
    pub(crate) async fn body(&self, provider: &str, auth: Auth) -> Result<String> {
        match self {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Http {
                url,
                client,
                api_key,
            } => {
                let mut req = client.get(url.as_str());
                if let Some(key) = api_key.as_deref() {
                    req = match auth {
                        Auth::Header(name) => req.header(name, key),
                        Auth::Bearer => req.bearer_auth(key),
                    };
                }
                let resp = match req.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(target: "ingest", error = ?e, provider, "provider http error");
                        return Err(e).with_context(|| format!("{provider} http get()"));
                    }
                };
                let status = resp.status();
                if !status.is_success() {
                    return Err(anyhow!("{provider} http status {status}"));
                }
                resp.text()
                    .await
                    .with_context(|| format!("{provider} http .text()"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Auth {
    Header(&'static str),
    Bearer,
}

/// Shared HTTP client for all providers. The per-request timeout mirrors the
/// fetcher's own bound so a hung socket is released either way.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("market-signal-pipeline/0.1")
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .context("building http client")
}

/// Build the provider for a configured source.
pub fn build_provider(
    source: &Source,
    catalog: Arc<EntityCatalog>,
    client: reqwest::Client,
) -> Result<Box<dyn SourceProvider>> {
    let api_key = source
        .api_key_env
        .as_deref()
        .and_then(|k| std::env::var(k).ok())
        .filter(|k| !k.trim().is_empty());
    let mode = Mode::Http {
        url: source.endpoint.clone(),
        client,
        api_key,
    };
    Ok(match source.kind {
        SourceKind::NewsApi => Box::new(news_api::NewsApiProvider::new(&source.id, mode, catalog)),
        SourceKind::Social => Box::new(social::SocialProvider::new(&source.id, mode, catalog)),
        SourceKind::Rss => Box::new(rss::RssProvider::new(&source.id, mode, catalog)),
        SourceKind::PriceFeed => {
            let entity = source
                .entity
                .as_deref()
                .ok_or_else(|| anyhow!("price feed `{}` has no entity", source.id))?;
            Box::new(price_feed::PriceFeedProvider::new(&source.id, entity, mode))
        }
    })
}

/// RFC 3339 / ISO 8601 to unix seconds; 0 when unparseable.
pub(crate) fn parse_rfc3339_to_unix(ts: &str) -> u64 {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp()).ok())
        .unwrap_or(0)
}

/// Feeds mix seconds and milliseconds; anything past year 33658 in seconds is ms.
pub(crate) fn epoch_to_secs(v: f64) -> u64 {
    if !v.is_finite() || v <= 0.0 {
        return 0;
    }
    if v > 1e12 {
        (v / 1_000.0) as u64
    } else {
        v as u64
    }
}

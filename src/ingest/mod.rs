// src/ingest/mod.rs
pub mod fetcher;
pub mod providers;
pub mod rate_limit;
pub mod tags;
pub mod types;

use crate::ingest::fetcher::SourceFetcher;
use crate::ingest::types::RawRecord;
use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;

/// One-time metrics registration (so series show up on the scrape endpoint).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_records_total", "Records parsed from providers.");
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetches that failed or timed out."
        );
        describe_counter!(
            "ingest_rate_limited_total",
            "Acquisitions that had to wait for a fresh rate-limit window."
        );
        describe_counter!(
            "ingest_dropped_total",
            "Records dropped as empty, untagged or duplicate."
        );
        describe_histogram!("ingest_fetch_ms", "Per-source fetch time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when an ingest cycle last ran.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim stray punctuation.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// Short stable id for a text; raw text never goes to the logs.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Drop untagged and empty text records, and identical texts seen earlier in the same cycle.
/// Price ticks pass through untouched. Returns (kept, dropped).
pub fn prepare_records(raw: Vec<RawRecord>) -> (Vec<RawRecord>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;

    for rec in raw {
        if let Some(text) = rec.text.as_deref() {
            let key = text.to_lowercase();
            if text.is_empty() || rec.entity_tags.is_empty() || !seen.insert(key) {
                tracing::trace!(
                    target: "ingest",
                    id = %anon_hash(text),
                    source = %rec.source_id,
                    "record dropped"
                );
                dropped += 1;
                continue;
            }
        } else if rec.price.is_none() {
            dropped += 1;
            continue;
        }
        kept.push(rec);
    }

    (kept, dropped)
}

/// Fetch every source once with at most `max_parallel` requests in flight.
/// Returns only after every fetch has completed or failed.
pub async fn run_once(fetchers: &[SourceFetcher], max_parallel: usize) -> Vec<RawRecord> {
    ensure_metrics_described();

    let width = max_parallel.clamp(1, fetchers.len().max(1));
    let batches: Vec<Vec<RawRecord>> = stream::iter(fetchers.iter())
        .map(SourceFetcher::fetch)
        .buffer_unordered(width)
        .collect()
        .await;

    let raw: Vec<RawRecord> = batches.into_iter().flatten().collect();
    let (kept, dropped) = prepare_records(raw);

    counter!("ingest_dropped_total").increment(dropped as u64);
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    gauge!("ingest_last_run_ts").set(now as f64);

    tracing::info!(
        target: "ingest",
        sources = fetchers.len(),
        kept = kept.len(),
        dropped,
        "ingest cycle finished"
    );
    kept
}

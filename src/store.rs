//! Record store collaborator.
//!
//! The pipeline needs two writes from its environment (append a price sample,
//! upsert a sentiment sample) plus the reads the facade and the cleanup duty
//! use. [`InMemoryStore`] is the implementation the binary and tests run with.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::aggregate::SentimentSample;
use crate::error::StoreError;
use crate::series::{PriceSample, PriceSeries};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns `false` when the sample was not newer than the stored tail.
    async fn append_price_sample(&self, entity: &str, sample: PriceSample)
        -> Result<bool, StoreError>;

    /// Replaces whatever sample the entity had.
    async fn upsert_sentiment_sample(&self, sample: SentimentSample) -> Result<(), StoreError>;

    /// Snapshot of the entity's series.
    async fn price_series(&self, entity: &str) -> Result<Option<PriceSeries>, StoreError>;

    async fn sentiment_sample(&self, entity: &str) -> Result<Option<SentimentSample>, StoreError>;

    /// Drop sentiment samples whose window ended before `cutoff` (unix secs).
    async fn prune(&self, cutoff: u64) -> Result<usize, StoreError>;
}

#[derive(Debug)]
pub struct InMemoryStore {
    lookback: usize,
    prices: RwLock<HashMap<String, PriceSeries>>,
    sentiment: RwLock<HashMap<String, SentimentSample>>,
}

impl InMemoryStore {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            prices: RwLock::new(HashMap::new()),
            sentiment: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(crate::series::MIN_LOOKBACK)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn append_price_sample(
        &self,
        entity: &str,
        sample: PriceSample,
    ) -> Result<bool, StoreError> {
        let key = entity.to_ascii_uppercase();
        let mut prices = self.prices.write();
        let series = prices
            .entry(key.clone())
            .or_insert_with(|| PriceSeries::new(key, self.lookback));
        Ok(series.push(sample))
    }

    async fn upsert_sentiment_sample(&self, sample: SentimentSample) -> Result<(), StoreError> {
        self.sentiment
            .write()
            .insert(sample.entity.to_ascii_uppercase(), sample);
        Ok(())
    }

    async fn price_series(&self, entity: &str) -> Result<Option<PriceSeries>, StoreError> {
        Ok(self.prices.read().get(&entity.to_ascii_uppercase()).cloned())
    }

    async fn sentiment_sample(&self, entity: &str) -> Result<Option<SentimentSample>, StoreError> {
        Ok(self
            .sentiment
            .read()
            .get(&entity.to_ascii_uppercase())
            .cloned())
    }

    async fn prune(&self, cutoff: u64) -> Result<usize, StoreError> {
        let mut map = self.sentiment.write();
        let before = map.len();
        map.retain(|_, s| s.window_end >= cutoff);
        Ok(before - map.len())
    }
}

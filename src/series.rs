//! # Series
//! Time-ordered data written by the aggregator and read by the facade.
//!
//! [`PriceSeries`] is a bounded, append-only window of price samples per
//! entity. Reads always go through a cloned snapshot, so the indicator engine
//! never observes a half-applied append.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Smallest lookback a series may be configured with.
pub const MIN_LOOKBACK: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub timestamp: u64,
    pub price: f64,
    pub volume: f64,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
}

impl PriceSample {
    pub fn new(timestamp: u64, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            price,
            volume,
            high: None,
            low: None,
        }
    }

    /// Bar high; a plain tick has high == close.
    pub fn high(&self) -> f64 {
        self.high.unwrap_or(self.price)
    }

    pub fn low(&self) -> f64 {
        self.low.unwrap_or(self.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    entity: String,
    lookback: usize,
    samples: VecDeque<PriceSample>,
}

impl PriceSeries {
    /// `lookback` is raised to [`MIN_LOOKBACK`] if smaller.
    pub fn new(entity: impl Into<String>, lookback: usize) -> Self {
        let lookback = lookback.max(MIN_LOOKBACK);
        Self {
            entity: entity.into(),
            lookback,
            samples: VecDeque::with_capacity(lookback),
        }
    }

    /// Build a series from samples in order; samples out of order are skipped.
    pub fn from_samples(
        entity: impl Into<String>,
        lookback: usize,
        samples: impl IntoIterator<Item = PriceSample>,
    ) -> Self {
        let mut s = Self::new(entity, lookback);
        for sample in samples {
            s.push(sample);
        }
        s
    }

    /// Append a sample strictly newer than the current tail.
    ///
    /// Returns `false` (and leaves the series untouched) for stale or
    /// repeated timestamps and for non-positive prices. Oldest samples are
    /// dropped once the lookback is exceeded.
    pub fn push(&mut self, sample: PriceSample) -> bool {
        if !sample.price.is_finite() || sample.price <= 0.0 {
            return false;
        }
        if let Some(last) = self.samples.back() {
            if sample.timestamp <= last.timestamp {
                return false;
            }
        }
        self.samples.push_back(sample);
        while self.samples.len() > self.lookback {
            self.samples.pop_front();
        }
        true
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&PriceSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceSample> {
        self.samples.iter()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.price).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.samples.iter().map(PriceSample::high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.samples.iter().map(PriceSample::low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.volume).collect()
    }
}

// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod error;
pub mod series;

// Ingestion and aggregation
pub mod aggregate;
pub mod ingest;
pub mod sentiment;

// Collaborators
pub mod cache;
pub mod store;

// Indicators, composite signal, external analysis
pub mod bridge;
pub mod indicators;
pub mod signal;

pub mod config;
pub mod metrics;
pub mod pipeline;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::scheduler::{ScheduleCfg, Scheduler};
pub use crate::aggregate::{Aggregator, AggregatorCfg, SentimentSample, Trend};
pub use crate::bridge::{AnalysisBridge, BridgeConfig, ProcessAnalyzer, ResultSource};
pub use crate::cache::{Cache, InMemoryCache};
pub use crate::config::PipelineConfig;
pub use crate::error::{CacheError, PipelineError, StoreError};
pub use crate::indicators::{IndicatorEngine, IndicatorSet};
pub use crate::pipeline::{AnalysisResult, EntityReport, Pipeline};
pub use crate::series::{PriceSample, PriceSeries};
pub use crate::signal::{CompositeSignal, Direction, SignalScorer, SignalWeights};
pub use crate::store::{InMemoryStore, RecordStore};

//! Error taxonomy for the pipeline.
//!
//! Only [`PipelineError::NoEntities`] and the collaborator failures
//! ([`PipelineError::Store`], [`PipelineError::Cache`]) ever leave
//! [`crate::pipeline::Pipeline::analyze`]. Everything else is resolved inside
//! the component that raised it: insufficient data becomes a neutral value,
//! a failing source becomes zero records, rate limiting becomes a bounded wait
//! and a failing external analysis becomes a tagged fallback.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("insufficient data: need {required} samples, got {provided}")]
    InsufficientData { required: usize, provided: usize },

    #[error("source `{source_id}` unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    #[error("source `{source_id}` rate limited for {wait:?}")]
    RateLimited { source_id: String, wait: Duration },

    #[error("external analysis failed: {0}")]
    ExternalAnalysisFailed(String),

    #[error("external analysis timed out after {0:?}")]
    ExternalAnalysisTimedOut(Duration),

    #[error("no entities requested")]
    NoEntities,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Record store collaborator is unreachable or rejected a write.
#[derive(Debug, Error)]
#[error("record store unavailable: {0}")]
pub struct StoreError(pub String);

/// Cache collaborator is unreachable or rejected a write.
#[derive(Debug, Error)]
#[error("cache unavailable: {0}")]
pub struct CacheError(pub String);

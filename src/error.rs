//! Error taxonomy for pipeline execution and timeline maintenance.
//!
//! Recoverable errors (schema validation, generation failures) are caught
//! by the fallback coordinator; cache-write faults, cancellation, and
//! timeline corruption always escape to the caller.

use thiserror::Error;

use crate::domain::Importance;

/// Errors surfaced by pipeline execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage produced output that does not match its declared schema.
    #[error("stage '{stage}' produced invalid output at field '{field}': {reason}")]
    SchemaValidation {
        stage: String,
        field: String,
        reason: String,
    },

    /// The generation port failed or timed out.
    #[error("generation failed for prompt '{prompt}': {source}")]
    Generation {
        prompt: String,
        #[source]
        source: GenerationError,
    },

    /// An artifact could not be persisted. Never swallowed: a store that
    /// silently fails to persist would corrupt the at-most-once guarantee.
    #[error("failed to persist artifact '{key}': {reason}")]
    CacheWrite { key: String, reason: String },

    /// Both the rich and the simple pipeline failed.
    #[error("recap pipeline exhausted; rich: {rich}; simple: {simple}")]
    Exhausted { rich: String, simple: String },

    /// The run was cancelled before completion.
    #[error("pipeline run cancelled")]
    Cancelled,

    /// The timeline rejected an operation or failed to persist.
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

impl PipelineError {
    /// Whether the fallback coordinator may recover from this error by
    /// switching to the single-stage pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SchemaValidation { .. } | Self::Generation { .. }
        )
    }

    /// The failing stage name, when the error is stage-scoped.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::SchemaValidation { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Errors from a [`GenerationPort`](crate::adapters::GenerationPort) call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("model endpoint returned status {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model response was not valid UTF-8 JSON: {0}")]
    MalformedResponse(String),
}

/// Errors owned by the timeline and its persistence.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// Chapters must be ingested in non-decreasing order; story time is
    /// derived from the latest chapter and cannot move backwards.
    #[error("chapter {given} arrived after chapter {latest} was already ingested")]
    OutOfOrderChapter { given: u32, latest: u32 },

    #[error("event date range is inverted: {date_start} > {date_end}")]
    InvertedDates {
        date_start: String,
        date_end: String,
    },

    #[error("unparseable event date '{value}' in field '{field}'")]
    BadDate { field: String, value: String },

    #[error("timeline is locked by another process: {path}")]
    Locked { path: String },

    #[error("timeline io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeline serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Importance parsing failure, kept separate so strict payload parsing can
/// name the offending value.
#[derive(Debug, Error)]
#[error("unknown importance '{0}', expected high|medium|low")]
pub struct ParseImportanceError(pub String);

impl std::str::FromStr for Importance {
    type Err = ParseImportanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Importance::High),
            "medium" => Ok(Importance::Medium),
            "low" => Ok(Importance::Low),
            other => Err(ParseImportanceError(other.to_string())),
        }
    }
}

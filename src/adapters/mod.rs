//! Generation port interfaces.
//!
//! The pipeline never talks to a model directly; it calls a
//! [`GenerationPort`], which hides transport, prompt templates, and any
//! retry policy the collaborator chooses to apply.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GenerationError;

// Re-export the HTTP port
pub use http::HttpModelPort;

/// Output from a generation call.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Raw model output; the stage runner strict-parses this as JSON.
    pub content: String,

    /// Tokens used, when the backend reports them.
    pub tokens_used: Option<u64>,
}

impl GenerationOutput {
    /// Create an output with just content.
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

/// Trait for generative-model backends.
///
/// Retries, if any, are the implementor's responsibility; the pipeline
/// treats a returned error as final for the current attempt.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    /// Human-readable port name for diagnostics.
    fn name(&self) -> &str;

    /// Produce a raw artifact for a prompt identifier and input variables.
    async fn generate(
        &self,
        prompt_id: &str,
        variables: &serde_json::Value,
        timeout: Duration,
    ) -> Result<GenerationOutput, GenerationError>;
}

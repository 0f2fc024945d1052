//! HTTP generation port.
//!
//! Posts `{prompt_id, variables}` to a model-server endpoint and expects a
//! JSON envelope with the generated content. Timeouts and non-2xx
//! responses map to [`GenerationError`] variants so the pipeline can
//! classify them for fallback.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::GenerationError;

use super::{GenerationOutput, GenerationPort};

/// Generation port backed by an HTTP model server.
pub struct HttpModelPort {
    endpoint: String,
    client: reqwest::Client,
}

/// Response envelope from the model server.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    content: String,
    #[serde(default)]
    tokens_used: Option<u64>,
}

impl HttpModelPort {
    /// Create a port for the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationPort for HttpModelPort {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        prompt_id: &str,
        variables: &serde_json::Value,
        timeout: Duration,
    ) -> Result<GenerationOutput, GenerationError> {
        debug!(prompt_id, endpoint = %self.endpoint, "dispatching generation request");

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&serde_json::json!({
                "prompt_id": prompt_id,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        seconds: timeout.as_secs(),
                    }
                } else {
                    GenerationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Endpoint {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        let envelope: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        Ok(GenerationOutput {
            content: envelope.content,
            tokens_used: envelope.tokens_used,
        })
    }
}

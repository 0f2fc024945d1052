//! Artifacts produced by pipeline stages.
//!
//! An artifact is one cached unit of generated content plus the metadata
//! needed to decide whether it can be reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::key::ArtifactKey;

/// A cached unit of generated content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// The key this artifact is stored under.
    pub key: ArtifactKey,

    /// Validated payload.
    pub payload: serde_json::Value,

    /// Name of the stage that produced this artifact.
    pub producer_stage: String,

    /// When the artifact was produced.
    pub produced_at: DateTime<Utc>,

    /// Whether this instance was served from cache rather than generated.
    pub cached: bool,

    /// SHA-256 digest of the canonical payload serialization.
    pub digest: String,
}

impl Artifact {
    /// Create a fresh (non-cached) artifact.
    pub fn new(key: ArtifactKey, producer_stage: impl Into<String>, payload: serde_json::Value) -> Self {
        let digest = payload_digest(&payload);
        Self {
            key,
            payload,
            producer_stage: producer_stage.into(),
            produced_at: Utc::now(),
            cached: false,
            digest,
        }
    }

    /// Mark this artifact as served from cache.
    pub fn into_cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Whether the stored digest still matches the payload.
    pub fn digest_matches(&self) -> bool {
        payload_digest(&self.payload) == self.digest
    }
}

/// SHA-256 digest (hex) of a payload's canonical JSON serialization.
pub fn payload_digest(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

//! Savepoint store for generation artifacts.
//!
//! Artifacts are stored one JSON file per key under the store root,
//! mirroring the hierarchical key namespace on disk. Two contracts matter
//! more than the medium:
//!
//! - **Atomic publish**: a save writes to a temp file and renames it into
//!   place, so a crash never leaves a key mapped to a half-written
//!   payload.
//! - **Single-flight**: at most one in-flight generation per key. Two
//!   tasks racing on the same missing key serialize on a per-key lock;
//!   the loser observes the winner's cached result instead of invoking
//!   the producer again.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{Artifact, ArtifactKey};
use crate::error::PipelineError;

/// Filesystem-backed artifact store.
pub struct SavepointStore {
    root: PathBuf,
    /// Per-key generation locks. Entries are created lazily and live for
    /// the store's lifetime.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SavepointStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(format!("{}.json", key.path()))
    }

    /// Whether an artifact is currently stored under `key`.
    pub fn exists(&self, key: &ArtifactKey) -> bool {
        self.file_path(key).is_file()
    }

    /// Load the artifact under `key`, if any. A stored artifact whose
    /// digest no longer matches its payload is treated as a miss.
    pub async fn load(&self, key: &ArtifactKey) -> Result<Option<Artifact>, PipelineError> {
        let path = self.file_path(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "savepoint read failed, treating as miss");
                return Ok(None);
            }
        };

        let artifact: Artifact = match serde_json::from_str(&raw) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(key = %key, error = %e, "stored artifact is unreadable, treating as miss");
                return Ok(None);
            }
        };

        if !artifact.digest_matches() {
            warn!(key = %key, "stored artifact failed digest check, treating as miss");
            return Ok(None);
        }

        Ok(Some(artifact))
    }

    /// Persist an artifact under its key. Write-then-publish: the payload
    /// lands in a temp file first and is renamed over the final path.
    pub async fn save(&self, artifact: &Artifact) -> Result<(), PipelineError> {
        let key = artifact.key.path();
        let path = self.file_path(&artifact.key);

        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let serialized = serde_json::to_string_pretty(artifact)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
            temp.write_all(serialized.as_bytes())?;
            temp.flush()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        };

        write().map_err(|e| PipelineError::CacheWrite {
            key,
            reason: e.to_string(),
        })?;

        debug!(key = %artifact.key, stage = %artifact.producer_stage, "savepoint written");
        Ok(())
    }

    /// Remove the artifact under `key`. Returns whether anything was
    /// removed.
    pub fn delete(&self, key: &ArtifactKey) -> bool {
        std::fs::remove_file(self.file_path(key)).is_ok()
    }

    /// List all stored keys starting with `prefix`, in sorted order.
    pub fn list_by_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys);
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        keys
    }

    /// Delete every artifact whose key starts with `prefix`. Returns the
    /// number of artifacts removed.
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for key in self.list_by_prefix(prefix) {
            let path = self.root.join(format!("{}.json", key));
            if std::fs::remove_file(path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Remove every stored artifact.
    pub fn clear(&self) -> std::io::Result<()> {
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Return the cached artifact under `key`, or run `producer` to make
    /// one, validate-agnostically persist it, and return it.
    ///
    /// Concurrent callers for the same key serialize on a per-key lock:
    /// exactly one invokes `producer`; the rest observe its result as a
    /// cache hit. Dropping the future (cancellation) releases the lock so
    /// waiters are never deadlocked.
    pub async fn get_or_generate<F, Fut>(
        &self,
        key: &ArtifactKey,
        stage: &str,
        force: bool,
        producer: F,
    ) -> Result<Artifact, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, PipelineError>>,
    {
        let key_lock = self.lock_for(key).await;
        let _guard = key_lock.lock().await;

        if !force {
            if let Some(artifact) = self.load(key).await? {
                debug!(key = %key, "savepoint hit");
                return Ok(artifact.into_cached());
            }
        }

        let payload = producer().await?;
        let artifact = Artifact::new(key.clone(), stage, payload);
        self.save(&artifact).await?;
        Ok(artifact)
    }

    async fn lock_for(&self, key: &ArtifactKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.path())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, keys);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            if let Ok(relative) = path.strip_prefix(root) {
                let key = relative.with_extension("");
                keys.push(key.to_string_lossy().replace('\\', "/"));
            }
        }
    }
}

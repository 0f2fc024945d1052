//! Typed savepoint keys.
//!
//! Savepoints are addressed by slash-delimited hierarchical paths such as
//! `chapter_7/recap` or `characters/Amy Harris/sheet`. Keys are built
//! through [`ArtifactKey`] rather than assembled from strings at call
//! sites, so a malformed path is a construction error instead of a silent
//! cache miss.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of entity a savepoint belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// A chapter-scoped artifact, e.g. `chapter_7/recap`.
    Chapter(u32),

    /// A character sheet or related artifact, e.g. `characters/Amy Harris/sheet`.
    Character(String),

    /// A setting sheet, e.g. `settings/Harlow House/sheet`.
    Setting(String),
}

/// A hierarchical key addressing one savepoint.
///
/// The `pending` flag scopes the key under `pending/`, the staging
/// namespace used by the rich pipeline until a whole run succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    kind: KeyKind,
    field: String,
    pending: bool,
}

/// Key construction failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key segment is empty")]
    EmptySegment,

    #[error("key segment '{0}' contains a path separator or traversal")]
    InvalidSegment(String),
}

fn validate_segment(segment: &str) -> Result<(), KeyError> {
    if segment.trim().is_empty() {
        return Err(KeyError::EmptySegment);
    }
    if segment.contains('/') || segment.contains('\\') || segment == "." || segment == ".." {
        return Err(KeyError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

impl ArtifactKey {
    /// Key for a chapter-scoped artifact (`chapter_{n}/{field}`).
    pub fn chapter(number: u32, field: impl Into<String>) -> Result<Self, KeyError> {
        let field = field.into();
        validate_segment(&field)?;
        Ok(Self {
            kind: KeyKind::Chapter(number),
            field,
            pending: false,
        })
    }

    /// Key for a character artifact (`characters/{name}/{field}`).
    pub fn character(name: impl Into<String>, field: impl Into<String>) -> Result<Self, KeyError> {
        let name = name.into();
        let field = field.into();
        validate_segment(&name)?;
        validate_segment(&field)?;
        Ok(Self {
            kind: KeyKind::Character(name),
            field,
            pending: false,
        })
    }

    /// Key for a setting artifact (`settings/{name}/{field}`).
    pub fn setting(name: impl Into<String>, field: impl Into<String>) -> Result<Self, KeyError> {
        let name = name.into();
        let field = field.into();
        validate_segment(&name)?;
        validate_segment(&field)?;
        Ok(Self {
            kind: KeyKind::Setting(name),
            field,
            pending: false,
        })
    }

    /// Key for a chapter artifact with a statically known field name.
    /// Static stage names are valid segments by construction.
    pub(crate) fn chapter_stage(number: u32, field: &'static str) -> Self {
        Self {
            kind: KeyKind::Chapter(number),
            field: field.to_string(),
            pending: false,
        }
    }

    /// Rescope this key under the `pending/` staging namespace.
    pub fn into_pending(mut self) -> Self {
        self.pending = true;
        self
    }

    /// Whether this key lives in the staging namespace.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The trailing field segment.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn kind(&self) -> &KeyKind {
        &self.kind
    }

    /// The full slash-delimited path for this key.
    pub fn path(&self) -> String {
        let base = match &self.kind {
            KeyKind::Chapter(n) => format!("chapter_{}/{}", n, self.field),
            KeyKind::Character(name) => format!("characters/{}/{}", name, self.field),
            KeyKind::Setting(name) => format!("settings/{}/{}", name, self.field),
        };
        if self.pending {
            format!("pending/{}", base)
        } else {
            base
        }
    }

    /// The staging prefix for one chapter's rich-pipeline run.
    pub fn pending_prefix(chapter: u32) -> String {
        format!("pending/chapter_{}/", chapter)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

//! Domain types for the chronicle pipeline.
//!
//! This module contains the core data structures:
//! - ArtifactKey / Artifact: cached generation outputs and their addresses
//! - TimelineEvent: narrative events with tiering and detail state
//! - RecapDocument: the tiered view handed to downstream stages

pub mod artifact;
pub mod event;
pub mod key;
pub mod recap;

// Re-export commonly used types
pub use artifact::{payload_digest, Artifact};
pub use event::{
    normalize_summary, parse_story_date, DetailLevel, Importance, IncomingEvent, Tier,
    TimelineEvent,
};
pub use key::{ArtifactKey, KeyError, KeyKind};
pub use recap::{EventView, RecapDocument};

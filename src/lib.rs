//! chronicle - resumable AI novel-generation pipeline
//!
//! A Rust pipeline for producing a growing narrative one chapter at a
//! time, where every generation step is expensive and must never be
//! recomputed needlessly.
//!
//! # Architecture
//!
//! Two subsystems carry the weight:
//! - Savepoints: every pipeline stage's output is cached under a
//!   hierarchical key with atomic publish and single-flight generation,
//!   so crashed or repeated runs resume instead of regenerating.
//! - The timeline: narrative events accumulate per chapter, age into
//!   tiers (current/recent/historical), and lose stored detail
//!   monotonically as they age, without ever being reordered,
//!   duplicated, or dropped.
//!
//! # Modules
//!
//! - `adapters`: generation-port implementations (HTTP model server)
//! - `core`: savepoints, stage running, the pipeline, fallback, compaction
//! - `domain`: data structures (Artifact, TimelineEvent, RecapDocument)
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the recap pipeline for chapter 7
//! chronicle chapter 7 --input chapters/07.txt
//!
//! # Show the cached recap
//! chronicle recap 7
//!
//! # Inspect the timeline
//! chronicle timeline
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use crate::core::{
    CancelHandle, ChapterContext, FallbackCoordinator, PipelineVariant, RecapPipeline,
    SavepointStore, TemporalCompactionEngine,
};
pub use adapters::{GenerationOutput, GenerationPort, HttpModelPort};
pub use config::StoryConfig;
pub use domain::{
    Artifact, ArtifactKey, DetailLevel, Importance, IncomingEvent, RecapDocument, Tier,
    TimelineEvent,
};
pub use error::{GenerationError, PipelineError, TimelineError};

//! Core pipeline and timeline logic.
//!
//! This module contains:
//! - SavepointStore: atomic, single-flight artifact caching
//! - StageRunner: per-stage strict parse / validate / persist contract
//! - RecapPipeline: the linear five-stage executor
//! - FallbackCoordinator: rich-to-simple pipeline fallback
//! - TemporalCompactionEngine: timeline tiering and compaction
//! - EventLog: timeline persistence with the story lock

pub mod compaction;
pub mod event_log;
pub mod executor;
pub mod fallback;
pub mod savepoint;
pub mod stage;

// Re-export commonly used types
pub use compaction::{
    detail_for, tier_for, CompactionPolicy, DetailTargets, IngestReport, TemporalCompactionEngine,
};
pub use event_log::EventLog;
pub use executor::{
    CancelHandle, ChapterContext, PipelineRun, RecapPipeline, RunPhase, StageName, STAGE_SEQUENCE,
};
pub use fallback::{FallbackCoordinator, PipelineVariant};
pub use savepoint::SavepointStore;
pub use stage::{
    strict_parse, PayloadShape, StageOutput, StageRunner, StageSchema, COMPACTED_SCHEMA,
    DATED_EVENTS_SCHEMA, EXTRACT_EVENTS_SCHEMA, RECAP_SCHEMA,
};

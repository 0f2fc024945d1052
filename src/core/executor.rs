//! The rich recap pipeline.
//!
//! A fixed, linear sequence of stages turns raw chapter text into the
//! tiered recap document: three model-backed stages (extract, timing,
//! enrichment) followed by two deterministic engine stages (compaction,
//! rendering). The executor is a straight-line state machine; it has no
//! branching and no retries of its own. Retry policy belongs to the
//! generation port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::adapters::GenerationPort;
use crate::domain::{Artifact, ArtifactKey, IncomingEvent};
use crate::error::PipelineError;

use super::compaction::TemporalCompactionEngine;
use super::stage::{
    StageOutput, StageRunner, StageSchema, COMPACTED_SCHEMA, DATED_EVENTS_SCHEMA,
    EXTRACT_EVENTS_SCHEMA, RECAP_SCHEMA,
};

/// The stages of the rich pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    ExtractEvents,
    AssignTiming,
    EnrichDetails,
    CompactEvents,
    FormatOutput,
}

pub const STAGE_SEQUENCE: [StageName; 5] = [
    StageName::ExtractEvents,
    StageName::AssignTiming,
    StageName::EnrichDetails,
    StageName::CompactEvents,
    StageName::FormatOutput,
];

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtractEvents => "extract_events",
            Self::AssignTiming => "assign_timing",
            Self::EnrichDetails => "enrich_details",
            Self::CompactEvents => "compact_events",
            Self::FormatOutput => "format_output",
        }
    }

    pub fn schema(self) -> &'static StageSchema {
        match self {
            Self::ExtractEvents => &EXTRACT_EVENTS_SCHEMA,
            Self::AssignTiming | Self::EnrichDetails => &DATED_EVENTS_SCHEMA,
            Self::CompactEvents => &COMPACTED_SCHEMA,
            Self::FormatOutput => &RECAP_SCHEMA,
        }
    }
}

/// Shared context for one chapter's pipeline run.
#[derive(Debug, Clone)]
pub struct ChapterContext {
    pub chapter: u32,
    pub story_start: NaiveDate,
    pub chapter_text: String,
}

/// Phase of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Pending,
    RunningStage(usize),
    Succeeded,
    Failed { stage: usize, cause: String },
}

/// Ephemeral state for one pipeline invocation: the phase, the chain of
/// stage artifacts, and whether fallback was taken. Discarded once the
/// final artifact (or terminal error) is produced.
#[derive(Debug)]
pub struct PipelineRun {
    pub phase: RunPhase,
    pub stage_artifacts: Vec<Artifact>,
    pub fell_back: bool,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Pending,
            stage_artifacts: Vec::new(),
            fell_back: false,
        }
    }

    /// The failing stage index, when the run failed.
    pub fn failed_stage(&self) -> Option<usize> {
        match &self.phase {
            RunPhase::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Cooperative cancellation flag, checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Executes the rich five-stage pipeline for one chapter.
pub struct RecapPipeline {
    runner: StageRunner,
    port: Arc<dyn GenerationPort>,
    generation_timeout: Duration,
}

impl RecapPipeline {
    pub fn new(
        runner: StageRunner,
        port: Arc<dyn GenerationPort>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            port,
            generation_timeout,
        }
    }

    /// Run all stages in order, threading each stage's validated payload
    /// into the next. Stage artifacts land in the pending namespace; the
    /// caller decides whether to promote or discard them.
    #[instrument(skip(self, ctx, engine, cancel, run), fields(chapter = ctx.chapter))]
    pub async fn execute(
        &self,
        ctx: &ChapterContext,
        engine: &mut TemporalCompactionEngine,
        force: bool,
        cancel: &CancelHandle,
        run: &mut PipelineRun,
    ) -> Result<Artifact, PipelineError> {
        let mut previous: Option<Value> = None;

        for (index, stage) in STAGE_SEQUENCE.into_iter().enumerate() {
            if let Err(e) = cancel.check() {
                run.phase = RunPhase::Failed {
                    stage: index,
                    cause: e.to_string(),
                };
                return Err(e);
            }

            run.phase = RunPhase::RunningStage(index);
            debug!(stage = stage.as_str(), index, "running stage");

            match self
                .run_stage(ctx, engine, stage, previous.as_ref(), force)
                .await
            {
                Ok(artifact) => {
                    previous = Some(artifact.payload.clone());
                    run.stage_artifacts.push(artifact);
                }
                Err(e) => {
                    run.phase = RunPhase::Failed {
                        stage: index,
                        cause: e.to_string(),
                    };
                    return Err(e);
                }
            }
        }

        run.phase = RunPhase::Succeeded;
        let artifact = run
            .stage_artifacts
            .last()
            .cloned()
            .expect("stage sequence is non-empty");
        Ok(artifact)
    }

    async fn run_stage(
        &self,
        ctx: &ChapterContext,
        engine: &mut TemporalCompactionEngine,
        stage: StageName,
        previous: Option<&Value>,
        force: bool,
    ) -> Result<Artifact, PipelineError> {
        let key = ArtifactKey::chapter_stage(ctx.chapter, stage.as_str()).into_pending();
        let schema = stage.schema();

        match stage {
            StageName::ExtractEvents => {
                let variables = json!({
                    "chapter_number": ctx.chapter,
                    "chapter_text": ctx.chapter_text,
                });
                self.model_stage(&key, stage, schema, force, variables).await
            }
            StageName::AssignTiming => {
                let variables = json!({
                    "chapter_number": ctx.chapter,
                    "story_start_date": ctx.story_start.to_string(),
                    "events": previous,
                });
                self.model_stage(&key, stage, schema, force, variables).await
            }
            StageName::EnrichDetails => {
                let variables = json!({
                    "chapter_number": ctx.chapter,
                    "events": previous,
                });
                self.model_stage(&key, stage, schema, force, variables).await
            }
            StageName::CompactEvents => {
                let incoming = parse_incoming(stage, previous)?;
                self.runner
                    .run(&key, stage.as_str(), schema, force, || async move {
                        let report = engine.advance_chapter(ctx.chapter, incoming)?;
                        let snapshot = json!({
                            "chapter": ctx.chapter,
                            "inserted": report.inserted,
                            "merged": report.merged,
                            "events": engine.events(),
                        });
                        Ok(StageOutput::Structured(snapshot))
                    })
                    .await
            }
            StageName::FormatOutput => {
                self.runner
                    .run(&key, stage.as_str(), schema, force, || async move {
                        let recap = serde_json::to_value(engine.render()).map_err(|e| {
                            PipelineError::SchemaValidation {
                                stage: stage.as_str().to_string(),
                                field: "$".to_string(),
                                reason: e.to_string(),
                            }
                        })?;
                        Ok(StageOutput::Structured(recap))
                    })
                    .await
            }
        }
    }

    async fn model_stage(
        &self,
        key: &ArtifactKey,
        stage: StageName,
        schema: &StageSchema,
        force: bool,
        variables: Value,
    ) -> Result<Artifact, PipelineError> {
        let prompt = stage.as_str();
        let port = Arc::clone(&self.port);
        let timeout = self.generation_timeout;

        self.runner
            .run(key, prompt, schema, force, || async move {
                let output = port
                    .generate(prompt, &variables, timeout)
                    .await
                    .map_err(|source| PipelineError::Generation {
                        prompt: prompt.to_string(),
                        source,
                    })?;
                Ok(StageOutput::Raw(output.content))
            })
            .await
    }
}

/// Parse the enrichment stage's validated payload into incoming events.
fn parse_incoming(
    stage: StageName,
    previous: Option<&Value>,
) -> Result<Vec<IncomingEvent>, PipelineError> {
    let value = previous.ok_or_else(|| PipelineError::SchemaValidation {
        stage: stage.as_str().to_string(),
        field: "$".to_string(),
        reason: "no upstream stage output".to_string(),
    })?;

    serde_json::from_value(value.clone()).map_err(|e| PipelineError::SchemaValidation {
        stage: stage.as_str().to_string(),
        field: "$".to_string(),
        reason: format!("event list does not deserialize: {}", e),
    })
}

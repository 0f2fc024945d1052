//! Fallback coordination between the rich and simple recap pipelines.
//!
//! The coordinator guarantees the caller one of two outcomes: a
//! schema-valid recap artifact under the chapter's real key, or an
//! explicit terminal error. Partial rich-pipeline output is never visible
//! outside the pending namespace and is never mixed with simple-pipeline
//! output.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::adapters::GenerationPort;
use crate::domain::{Artifact, ArtifactKey};
use crate::error::PipelineError;

use super::compaction::TemporalCompactionEngine;
use super::executor::{CancelHandle, ChapterContext, PipelineRun, RecapPipeline};
use super::savepoint::SavepointStore;
use super::stage::{strict_parse, StageRunner, RECAP_SCHEMA};

/// Which pipeline shape to run, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineVariant {
    /// Rich five-stage pipeline with single-stage fallback.
    MultiStage,
    /// Single-stage compose only.
    SingleStage,
}

/// Prompt id for the single-stage compose path.
const COMPOSE_PROMPT: &str = "compose_recap";

/// Wraps the rich pipeline with the single-stage alternative.
pub struct FallbackCoordinator {
    variant: PipelineVariant,
    store: Arc<SavepointStore>,
    pipeline: RecapPipeline,
    port: Arc<dyn GenerationPort>,
    generation_timeout: Duration,
}

impl FallbackCoordinator {
    pub fn new(
        variant: PipelineVariant,
        store: Arc<SavepointStore>,
        port: Arc<dyn GenerationPort>,
        generation_timeout: Duration,
    ) -> Self {
        let pipeline = RecapPipeline::new(
            StageRunner::new(Arc::clone(&store)),
            Arc::clone(&port),
            generation_timeout,
        );
        Self {
            variant,
            store,
            pipeline,
            port,
            generation_timeout,
        }
    }

    pub fn variant(&self) -> PipelineVariant {
        self.variant
    }

    /// Produce the recap artifact for one chapter, caching it under
    /// `chapter_{n}/recap`. Concurrent calls for the same chapter
    /// single-flight on that key.
    #[instrument(skip(self, ctx, engine, cancel), fields(chapter = ctx.chapter, variant = ?self.variant))]
    pub async fn run_chapter(
        &self,
        ctx: &ChapterContext,
        engine: &mut TemporalCompactionEngine,
        force: bool,
        cancel: &CancelHandle,
    ) -> Result<Artifact, PipelineError> {
        let final_key = ArtifactKey::chapter_stage(ctx.chapter, "recap");

        let artifact = self
            .store
            .get_or_generate(&final_key, "recap", force, || async move {
                cancel.check()?;
                match self.variant {
                    PipelineVariant::SingleStage => self.compose_only(ctx).await,
                    PipelineVariant::MultiStage => self.rich_then_fallback(ctx, engine, force, cancel).await,
                }
            })
            .await?;

        // Staged artifacts are only useful for resuming an interrupted
        // run; once the recap is published they are cleared.
        let cleared = self
            .store
            .delete_by_prefix(&ArtifactKey::pending_prefix(ctx.chapter));
        if cleared > 0 {
            debug!(cleared, "cleared pending namespace");
        }

        Ok(artifact)
    }

    async fn rich_then_fallback(
        &self,
        ctx: &ChapterContext,
        engine: &mut TemporalCompactionEngine,
        force: bool,
        cancel: &CancelHandle,
    ) -> Result<Value, PipelineError> {
        let mut run = PipelineRun::new();

        match self
            .pipeline
            .execute(ctx, engine, force, cancel, &mut run)
            .await
        {
            Ok(artifact) => {
                info!(chapter = ctx.chapter, "rich pipeline succeeded");
                Ok(artifact.payload)
            }
            Err(rich) if rich.is_recoverable() => {
                warn!(
                    chapter = ctx.chapter,
                    failed_stage = run.failed_stage(),
                    cause = %rich,
                    "rich pipeline failed, falling back to single-stage compose"
                );
                run.fell_back = true;

                // Partial rich output must not survive under its keys.
                let discarded = self
                    .store
                    .delete_by_prefix(&ArtifactKey::pending_prefix(ctx.chapter));
                debug!(discarded, "discarded partial rich-pipeline artifacts");

                match self.compose_simple(ctx).await {
                    Ok(payload) => Ok(payload),
                    Err(simple) if simple.is_recoverable() => Err(PipelineError::Exhausted {
                        rich: rich.to_string(),
                        simple: simple.to_string(),
                    }),
                    Err(simple) => Err(simple),
                }
            }
            Err(fatal) => Err(fatal),
        }
    }

    async fn compose_only(&self, ctx: &ChapterContext) -> Result<Value, PipelineError> {
        match self.compose_simple(ctx).await {
            Ok(payload) => Ok(payload),
            Err(simple) if simple.is_recoverable() => Err(PipelineError::Exhausted {
                rich: "skipped (single-stage variant)".to_string(),
                simple: simple.to_string(),
            }),
            Err(fatal) => Err(fatal),
        }
    }

    /// The single-stage alternative: one model call producing the full
    /// recap document schema directly from chapter text.
    async fn compose_simple(&self, ctx: &ChapterContext) -> Result<Value, PipelineError> {
        let variables = json!({
            "chapter_number": ctx.chapter,
            "story_start_date": ctx.story_start.to_string(),
            "chapter_text": ctx.chapter_text,
        });

        let output = self
            .port
            .generate(COMPOSE_PROMPT, &variables, self.generation_timeout)
            .await
            .map_err(|source| PipelineError::Generation {
                prompt: COMPOSE_PROMPT.to_string(),
                source,
            })?;

        let payload = strict_parse(COMPOSE_PROMPT, &output.content)?;
        RECAP_SCHEMA.validate(COMPOSE_PROMPT, &payload)?;
        Ok(payload)
    }
}

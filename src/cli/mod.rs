//! Command-line interface for chronicle.
//!
//! Thin wrappers over the library: run a chapter's recap pipeline, show
//! cached recaps, inspect the timeline, and manage savepoints.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{GenerationPort, HttpModelPort};
use crate::config::StoryConfig;
use crate::core::{
    CancelHandle, ChapterContext, EventLog, FallbackCoordinator, PipelineVariant, SavepointStore,
    TemporalCompactionEngine,
};
use crate::domain::ArtifactKey;

/// chronicle - resumable AI novel-generation pipeline
#[derive(Parser, Debug)]
#[command(name = "chronicle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the recap pipeline for a chapter
    Chapter {
        /// Chapter number
        number: u32,

        /// Chapter text file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Regenerate even if cached artifacts exist
        #[arg(long)]
        force: bool,

        /// Use the single-stage pipeline instead of the rich one
        #[arg(long)]
        single_stage: bool,
    },

    /// Show the cached recap for a chapter
    Recap {
        /// Chapter number
        number: u32,
    },

    /// List timeline events with their tier and detail level
    Timeline,

    /// List stored savepoints
    Savepoints {
        /// Only show keys starting with this prefix
        prefix: Option<String>,
    },

    /// Remove all stored savepoints
    Clear,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = StoryConfig::load()?;

        match self.command {
            Commands::Chapter {
                number,
                input,
                force,
                single_stage,
            } => run_chapter(&config, number, input, force, single_stage).await,
            Commands::Recap { number } => show_recap(&config, number).await,
            Commands::Timeline => show_timeline(&config).await,
            Commands::Savepoints { prefix } => list_savepoints(&config, prefix),
            Commands::Clear => clear_savepoints(&config),
        }
    }
}

async fn run_chapter(
    config: &StoryConfig,
    number: u32,
    input: Option<PathBuf>,
    force: bool,
    single_stage: bool,
) -> Result<()> {
    let chapter_text = read_input(input)?;

    let store = Arc::new(SavepointStore::open(config.savepoints_dir())?);
    let port: Arc<dyn GenerationPort> = Arc::new(HttpModelPort::new(&config.model_endpoint));

    let log = EventLog::open(config.timeline_dir()).await?;
    let mut engine = TemporalCompactionEngine::open(log, config.compaction).await?;

    let variant = if single_stage {
        PipelineVariant::SingleStage
    } else {
        PipelineVariant::MultiStage
    };
    let coordinator =
        FallbackCoordinator::new(variant, store, port, config.generation_timeout);

    let ctx = ChapterContext {
        chapter: number,
        story_start: config.story_start_date,
        chapter_text,
    };
    let cancel = CancelHandle::new();

    let artifact = coordinator
        .run_chapter(&ctx, &mut engine, force, &cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&artifact.payload)?);
    Ok(())
}

async fn show_recap(config: &StoryConfig, number: u32) -> Result<()> {
    let store = SavepointStore::open(config.savepoints_dir())?;
    let key = ArtifactKey::chapter(number, "recap")?;

    match store.load(&key).await? {
        Some(artifact) => {
            println!("{}", serde_json::to_string_pretty(&artifact.payload)?);
        }
        None => {
            println!("No recap cached for chapter {}", number);
        }
    }
    Ok(())
}

async fn show_timeline(config: &StoryConfig) -> Result<()> {
    let log = EventLog::open(config.timeline_dir()).await?;
    let engine = TemporalCompactionEngine::open(log, config.compaction).await?;

    if engine.is_empty() {
        println!("Timeline is empty");
        return Ok(());
    }

    for event in engine.events() {
        println!(
            "{} .. {}  [{:?}/{:?}/{:?}]  ch{}  {}",
            event.date_start.format("%Y-%m-%d %H:%M"),
            event.date_end.format("%Y-%m-%d %H:%M"),
            event.tier,
            event.detail,
            event.importance,
            event.source_chapter,
            event.summary
        );
    }
    println!(
        "\n{} events, story time {}",
        engine.len(),
        engine
            .story_now()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}

fn list_savepoints(config: &StoryConfig, prefix: Option<String>) -> Result<()> {
    let store = SavepointStore::open(config.savepoints_dir())?;
    let keys = store.list_by_prefix(prefix.as_deref().unwrap_or(""));

    if keys.is_empty() {
        println!("No savepoints stored");
        return Ok(());
    }

    for key in keys {
        println!("{}", key);
    }
    Ok(())
}

fn clear_savepoints(config: &StoryConfig) -> Result<()> {
    let store = SavepointStore::open(config.savepoints_dir())?;
    store.clear().context("Failed to clear savepoints")?;
    println!("Savepoints cleared");
    Ok(())
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            Ok(buffer)
        }
    }
}

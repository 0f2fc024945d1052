//! Fallback Coordination Integration Tests
//!
//! Rich-pipeline failure handling: pending-namespace discard, the
//! single-stage fallback, and terminal exhaustion.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chronicle::core::{
    CancelHandle, ChapterContext, CompactionPolicy, EventLog, FallbackCoordinator,
    PipelineVariant, SavepointStore, TemporalCompactionEngine,
};
use chronicle::domain::ArtifactKey;
use chronicle::{GenerationError, GenerationOutput, GenerationPort, PipelineError};
use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;

/// Generation port scripted per prompt id.
struct ScriptedPort {
    responses: Mutex<HashMap<String, String>>,
    failures: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedPort {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn respond(&self, prompt: &str, content: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(prompt.to_string(), content.into());
    }

    fn fail(&self, prompt: &str) {
        self.failures.lock().unwrap().insert(prompt.to_string());
    }

    fn calls(&self, prompt: &str) -> usize {
        self.calls.lock().unwrap().get(prompt).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GenerationPort for ScriptedPort {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt_id: &str,
        _variables: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<GenerationOutput, GenerationError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(prompt_id.to_string())
            .or_default() += 1;

        if self.failures.lock().unwrap().contains(prompt_id) {
            return Err(GenerationError::Transport("scripted failure".to_string()));
        }

        let responses = self.responses.lock().unwrap();
        match responses.get(prompt_id) {
            Some(content) => Ok(GenerationOutput::new(content.clone())),
            None => Err(GenerationError::Transport(format!(
                "no script for prompt '{}'",
                prompt_id
            ))),
        }
    }
}

fn undated_events() -> String {
    json!([{
        "summary": "Amy confronts the caretaker",
        "importance": "high",
        "key_events": ["the confrontation"],
        "character_development": ["Amy stops deferring"],
        "locations": ["the cellar stairs"],
        "symbols_motifs": ["the three locks"]
    }])
    .to_string()
}

fn dated_events() -> String {
    json!([{
        "summary": "Amy confronts the caretaker",
        "importance": "high",
        "date_start": "2024-01-11 09:00",
        "date_end": "2024-01-11 09:00",
        "key_events": ["the confrontation"],
        "character_development": ["Amy stops deferring"],
        "locations": ["the cellar stairs"],
        "symbols_motifs": ["the three locks"]
    }])
    .to_string()
}

fn simple_recap() -> String {
    json!({
        "historical_context": [],
        "recent_events": [],
        "current_chapter": [{
            "date_start": "2024-01-11 09:00",
            "date_end": "2024-01-11 09:00",
            "summary": "Amy confronts the caretaker",
            "key_events": ["the confrontation"],
            "character_development": [],
            "locations": ["the cellar stairs"],
            "symbols_motifs": []
        }]
    })
    .to_string()
}

fn script_rich_success(port: &ScriptedPort) {
    port.respond("extract_events", undated_events());
    port.respond("assign_timing", dated_events());
    port.respond("enrich_details", dated_events());
}

struct Harness {
    store: Arc<SavepointStore>,
    port: Arc<ScriptedPort>,
    engine: TemporalCompactionEngine,
    coordinator: FallbackCoordinator,
    _savepoints: TempDir,
    _timeline: TempDir,
}

async fn harness(variant: PipelineVariant) -> Harness {
    let savepoints = TempDir::new().unwrap();
    let timeline = TempDir::new().unwrap();

    let store = Arc::new(SavepointStore::open(savepoints.path()).unwrap());
    let port = Arc::new(ScriptedPort::new());
    let log = EventLog::open(timeline.path()).await.unwrap();
    let engine = TemporalCompactionEngine::open(log, CompactionPolicy::default())
        .await
        .unwrap();

    let coordinator = FallbackCoordinator::new(
        variant,
        Arc::clone(&store),
        Arc::clone(&port) as Arc<dyn GenerationPort>,
        Duration::from_secs(5),
    );

    Harness {
        store,
        port,
        engine,
        coordinator,
        _savepoints: savepoints,
        _timeline: timeline,
    }
}

fn ctx(chapter: u32) -> ChapterContext {
    ChapterContext {
        chapter,
        story_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        chapter_text: "Amy went down to the cellar at last.".to_string(),
    }
}

#[tokio::test]
async fn test_rich_pipeline_success_skips_fallback() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    script_rich_success(&h.port);

    let artifact = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(artifact.payload["current_chapter"].as_array().unwrap().len(), 1);
    assert_eq!(h.port.calls("compose_recap"), 0);
    assert_eq!(h.engine.len(), 1);

    // The recap is published under the real key; the pending namespace
    // is cleared.
    let final_key = ArtifactKey::chapter(1, "recap").unwrap();
    assert!(h.store.exists(&final_key));
    assert!(h.store.list_by_prefix("pending/").is_empty());
}

#[tokio::test]
async fn test_generation_failure_falls_back_to_simple() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    script_rich_success(&h.port);
    h.port.fail("enrich_details");
    h.port.respond("compose_recap", simple_recap());

    let artifact = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();

    // The caller receives a schema-valid recap from the simple path.
    assert_eq!(h.port.calls("compose_recap"), 1);
    assert_eq!(
        artifact.payload["current_chapter"][0]["summary"],
        "Amy confronts the caretaker"
    );

    // No rich-pipeline intermediate artifact survives anywhere.
    assert!(h.store.list_by_prefix("pending/").is_empty());
    // The fallback path does not feed the timeline.
    assert!(h.engine.is_empty());
}

#[tokio::test]
async fn test_schema_invalid_stage_falls_back() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    // The extraction stage answers with prose instead of JSON.
    h.port
        .respond("extract_events", "Sure! Here are the events you asked for.");
    h.port.respond("compose_recap", simple_recap());

    let artifact = h
        .coordinator
        .run_chapter(&ctx(2), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(h.port.calls("compose_recap"), 1);
    assert!(artifact.payload.get("current_chapter").is_some());
    assert!(h.store.list_by_prefix("pending/").is_empty());
}

#[tokio::test]
async fn test_missing_required_field_falls_back() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    // Valid JSON, wrong shape: events missing the importance field.
    h.port.respond(
        "extract_events",
        json!([{
            "summary": "something happened",
            "key_events": [],
            "character_development": [],
            "locations": [],
            "symbols_motifs": []
        }])
        .to_string(),
    );
    h.port.respond("compose_recap", simple_recap());

    let artifact = h
        .coordinator
        .run_chapter(&ctx(3), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(h.port.calls("compose_recap"), 1);
    assert!(artifact.payload.get("historical_context").is_some());
}

#[tokio::test]
async fn test_both_pipelines_failing_is_terminal() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    h.port.fail("extract_events");
    h.port.fail("compose_recap");

    let err = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::Exhausted { rich, simple } => {
            assert!(rich.contains("extract_events"));
            assert!(simple.contains("compose_recap"));
        }
        other => panic!("expected Exhausted, got {:?}", other),
    }

    // Nothing was published.
    let final_key = ArtifactKey::chapter(1, "recap").unwrap();
    assert!(!h.store.exists(&final_key));
}

#[tokio::test]
async fn test_single_stage_variant_never_runs_rich_pipeline() {
    let mut h = harness(PipelineVariant::SingleStage).await;
    script_rich_success(&h.port);
    h.port.respond("compose_recap", simple_recap());

    let artifact = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(h.port.calls("extract_events"), 0);
    assert_eq!(h.port.calls("compose_recap"), 1);
    assert!(artifact.payload.get("current_chapter").is_some());
}

#[tokio::test]
async fn test_cancellation_is_not_exhaustion() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    script_rich_success(&h.port);

    let cancel = CancelHandle::new();
    cancel.cancel();

    let err = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(h.port.calls("extract_events"), 0);
    let final_key = ArtifactKey::chapter(1, "recap").unwrap();
    assert!(!h.store.exists(&final_key));
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let mut h = harness(PipelineVariant::MultiStage).await;
    script_rich_success(&h.port);

    let first = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();
    assert!(!first.cached);
    let extract_calls = h.port.calls("extract_events");

    let second = h
        .coordinator
        .run_chapter(&ctx(1), &mut h.engine, false, &CancelHandle::new())
        .await
        .unwrap();

    assert!(second.cached);
    assert_eq!(second.digest, first.digest);
    assert_eq!(h.port.calls("extract_events"), extract_calls);
}

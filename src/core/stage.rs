//! Stage execution: strict parsing, structural validation, and the
//! cached-run contract.
//!
//! A stage's raw output is parsed as JSON in one strict step; there is no
//! best-effort substring extraction from free text. Anything that fails
//! to parse or to match the stage's declared shape is a
//! [`PipelineError::SchemaValidation`] naming the stage and field, never
//! a silently substituted default.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::{Artifact, ArtifactKey};
use crate::error::PipelineError;

use super::savepoint::SavepointStore;

/// Top-level shape a stage payload must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// An array of objects, each matching the field requirements.
    Array,
    /// A single object matching the field requirements.
    Object,
}

/// Structural schema for one stage's output.
#[derive(Debug, Clone, Copy)]
pub struct StageSchema {
    pub shape: PayloadShape,
    /// Fields that must be present as non-null strings.
    pub required_strings: &'static [&'static str],
    /// Fields that must be present as arrays. An empty array is a valid
    /// value; a missing or non-array field is not.
    pub required_arrays: &'static [&'static str],
}

/// Event-list fields shared by the extraction stages.
const EVENT_LIST_FIELDS: &[&str] = &[
    "key_events",
    "character_development",
    "locations",
    "symbols_motifs",
];

/// `extract_events`: events with content and importance, no dates yet.
pub const EXTRACT_EVENTS_SCHEMA: StageSchema = StageSchema {
    shape: PayloadShape::Array,
    required_strings: &["summary", "importance"],
    required_arrays: EVENT_LIST_FIELDS,
};

/// `assign_timing` and `enrich_details`: dated events.
pub const DATED_EVENTS_SCHEMA: StageSchema = StageSchema {
    shape: PayloadShape::Array,
    required_strings: &["summary", "importance", "date_start", "date_end"],
    required_arrays: EVENT_LIST_FIELDS,
};

/// `compact_events`: the engine's post-compaction snapshot.
pub const COMPACTED_SCHEMA: StageSchema = StageSchema {
    shape: PayloadShape::Object,
    required_strings: &[],
    required_arrays: &["events"],
};

/// `format_output` and the single-stage compose: the recap document.
pub const RECAP_SCHEMA: StageSchema = StageSchema {
    shape: PayloadShape::Object,
    required_strings: &[],
    required_arrays: &["historical_context", "recent_events", "current_chapter"],
};

impl StageSchema {
    /// Validate a payload against this schema, naming the failing field.
    pub fn validate(&self, stage: &str, payload: &Value) -> Result<(), PipelineError> {
        match self.shape {
            PayloadShape::Array => {
                let items = payload.as_array().ok_or_else(|| invalid(stage, "$", "expected a JSON array"))?;
                for (index, item) in items.iter().enumerate() {
                    self.validate_object(stage, &format!("[{}]", index), item)?;
                }
                Ok(())
            }
            PayloadShape::Object => self.validate_object(stage, "$", payload),
        }
    }

    fn validate_object(&self, stage: &str, at: &str, value: &Value) -> Result<(), PipelineError> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid(stage, at, "expected a JSON object"))?;

        for field in self.required_strings {
            match object.get(*field) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(Value::String(_)) => {
                    return Err(invalid(stage, &format!("{}.{}", at, field), "string is empty"))
                }
                Some(_) => {
                    return Err(invalid(stage, &format!("{}.{}", at, field), "expected a string"))
                }
                None => {
                    return Err(invalid(stage, &format!("{}.{}", at, field), "missing required field"))
                }
            }
        }

        for field in self.required_arrays {
            match object.get(*field) {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(invalid(stage, &format!("{}.{}", at, field), "expected an array"))
                }
                None => {
                    return Err(invalid(stage, &format!("{}.{}", at, field), "missing required field"))
                }
            }
        }

        Ok(())
    }
}

fn invalid(stage: &str, field: &str, reason: &str) -> PipelineError {
    PipelineError::SchemaValidation {
        stage: stage.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Strictly parse raw model output as JSON.
pub fn strict_parse(stage: &str, raw: &str) -> Result<Value, PipelineError> {
    serde_json::from_str(raw).map_err(|e| invalid(stage, "$", &format!("not valid JSON: {}", e)))
}

/// Raw output handed to the stage runner by a producer.
pub enum StageOutput {
    /// Text straight from the generation port; strict-parsed before
    /// validation.
    Raw(String),
    /// Already-structured output from a deterministic engine stage.
    Structured(Value),
}

/// Runs one pipeline stage under the cached/forced/validated contract.
///
/// Exactly one store write happens per successful run; failure paths
/// write nothing. Cache hits return without invoking the producer at all
/// (single-flight is enforced by the store's per-key lock).
pub struct StageRunner {
    store: Arc<SavepointStore>,
}

impl StageRunner {
    pub fn new(store: Arc<SavepointStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SavepointStore> {
        &self.store
    }

    /// Execute a stage: return the cached artifact, or produce, validate,
    /// persist, and return a fresh one.
    pub async fn run<F, Fut>(
        &self,
        key: &ArtifactKey,
        stage: &str,
        schema: &StageSchema,
        force: bool,
        producer: F,
    ) -> Result<Artifact, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StageOutput, PipelineError>>,
    {
        self.store
            .get_or_generate(key, stage, force, || async move {
                let payload = match producer().await? {
                    StageOutput::Raw(text) => strict_parse(stage, &text)?,
                    StageOutput::Structured(value) => value,
                };
                schema.validate(stage, &payload)?;
                Ok(payload)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_item() -> Value {
        json!({
            "summary": "Amy finds the letter",
            "importance": "high",
            "key_events": ["found the letter"],
            "character_development": [],
            "locations": ["Harlow House"],
            "symbols_motifs": []
        })
    }

    #[test]
    fn test_extract_schema_accepts_valid_events() {
        let payload = json!([event_item()]);
        assert!(EXTRACT_EVENTS_SCHEMA.validate("extract_events", &payload).is_ok());
    }

    #[test]
    fn test_empty_array_is_a_valid_value() {
        // An empty list is acceptable output; a malformed payload is not.
        assert!(EXTRACT_EVENTS_SCHEMA.validate("extract_events", &json!([])).is_ok());
    }

    #[test]
    fn test_missing_field_names_stage_and_field() {
        let mut item = event_item();
        item.as_object_mut().unwrap().remove("summary");

        let err = EXTRACT_EVENTS_SCHEMA
            .validate("extract_events", &json!([item]))
            .unwrap_err();
        match err {
            PipelineError::SchemaValidation { stage, field, .. } => {
                assert_eq!(stage, "extract_events");
                assert_eq!(field, "[0].summary");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_array_list_field_rejected() {
        let mut item = event_item();
        item["key_events"] = json!("found the letter");

        let err = EXTRACT_EVENTS_SCHEMA
            .validate("extract_events", &json!([item]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaValidation { field, .. } if field == "[0].key_events"));
    }

    #[test]
    fn test_dated_schema_requires_dates() {
        let err = DATED_EVENTS_SCHEMA
            .validate("assign_timing", &json!([event_item()]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaValidation { field, .. } if field == "[0].date_start"));
    }

    #[test]
    fn test_recap_schema_requires_three_sections() {
        let full = json!({
            "historical_context": [],
            "recent_events": [],
            "current_chapter": []
        });
        assert!(RECAP_SCHEMA.validate("format_output", &full).is_ok());

        let partial = json!({"historical_context": [], "recent_events": []});
        let err = RECAP_SCHEMA.validate("format_output", &partial).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaValidation { field, .. } if field == "$.current_chapter"));
    }

    #[test]
    fn test_strict_parse_rejects_free_text() {
        let err = strict_parse("extract_events", "Here are the events:\n[]").unwrap_err();
        assert!(matches!(err, PipelineError::SchemaValidation { field, .. } if field == "$"));

        assert_eq!(strict_parse("extract_events", "[]").unwrap(), json!([]));
    }
}

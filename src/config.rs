//! Story configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CHRONICLE_HOME)
//! 2. Config file (.chronicle/config.yaml)
//! 3. Defaults (~/.chronicle, story start 2024-01-01)
//!
//! Config file discovery searches the current directory and parents for
//! `.chronicle/config.yaml`. The loaded configuration is an explicit
//! value passed into constructors; nothing here is cached process-wide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::core::CompactionPolicy;

/// Raw config file schema (matches the YAML structure).
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub story: Option<StorySection>,
    #[serde(default)]
    pub model: Option<ModelSection>,
    #[serde(default)]
    pub compaction: Option<CompactionPolicy>,
    #[serde(default)]
    pub paths: Option<PathsSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorySection {
    /// Story start date, ISO format (e.g. 2024-01-01).
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsSection {
    /// Engine state directory (relative to the config file's parent).
    pub home: Option<String>,
}

/// Resolved configuration passed explicitly into constructors.
#[derive(Debug, Clone)]
pub struct StoryConfig {
    /// Absolute path to chronicle home (engine state).
    pub home: PathBuf,

    /// In-world date the story begins.
    pub story_start_date: NaiveDate,

    /// Model server endpoint for the HTTP generation port.
    pub model_endpoint: String,

    /// Per-call generation timeout.
    pub generation_timeout: Duration,

    /// Detail-reduction targets for the compaction engine.
    pub compaction: CompactionPolicy,

    /// Path to the config file, if one was found.
    pub config_file: Option<PathBuf>,
}

const DEFAULT_ENDPOINT: &str = "http://localhost:8080/generate";
const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

impl StoryConfig {
    /// Load configuration from the environment, a discovered config file,
    /// and defaults.
    pub fn load() -> Result<Self> {
        let config_file = find_config_file();

        let parsed = match &config_file {
            Some(path) => Some(load_config_file(path)?),
            None => None,
        };

        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".chronicle");

        let home = if let Ok(env_home) = std::env::var("CHRONICLE_HOME") {
            PathBuf::from(env_home)
        } else if let (Some(path), Some(file)) = (
            parsed
                .as_ref()
                .and_then(|c| c.paths.as_ref())
                .and_then(|p| p.home.as_deref()),
            config_file.as_ref(),
        ) {
            let base = file.parent().unwrap_or(Path::new("."));
            resolve_path(base, path)
        } else {
            default_home
        };

        let story_start_date = parsed
            .as_ref()
            .and_then(|c| c.story.as_ref())
            .and_then(|s| s.start_date)
            .unwrap_or_else(default_story_start);

        let model_endpoint = parsed
            .as_ref()
            .and_then(|c| c.model.as_ref())
            .and_then(|m| m.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let timeout_seconds = parsed
            .as_ref()
            .and_then(|c| c.model.as_ref())
            .and_then(|m| m.timeout_seconds)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        let compaction = parsed
            .as_ref()
            .and_then(|c| c.compaction)
            .unwrap_or_default();

        Ok(Self {
            home,
            story_start_date,
            model_endpoint,
            generation_timeout: Duration::from_secs(timeout_seconds),
            compaction,
            config_file,
        })
    }

    /// Directory holding cached artifacts.
    pub fn savepoints_dir(&self) -> PathBuf {
        self.home.join("savepoints")
    }

    /// Directory holding the timeline log and story lock.
    pub fn timeline_dir(&self) -> PathBuf {
        self.home.join("timeline")
    }
}

fn default_story_start() -> NaiveDate {
    // Stories that never configure a start date get a fixed epoch so
    // relative timing stays reproducible.
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

/// Find a config file by searching the current directory and parents.
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".chronicle").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file.
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory.
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let chronicle_dir = temp.path().join(".chronicle");
        std::fs::create_dir_all(&chronicle_dir).unwrap();

        let config_path = chronicle_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
story:
  start_date: 2024-01-01
model:
  endpoint: http://localhost:9999/generate
  timeout_seconds: 45
compaction:
  light:
    max_summary_words: 100
    max_list_items: 8
  heavy:
    max_summary_words: 50
    max_list_items: 4
  minimal:
    max_summary_words: 20
    max_list_items: 2
paths:
  home: ./state
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(
            config.story.unwrap().start_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        let model = config.model.unwrap();
        assert_eq!(model.endpoint.as_deref(), Some("http://localhost:9999/generate"));
        assert_eq!(model.timeout_seconds, Some(45));
        assert_eq!(config.compaction.unwrap().light.max_summary_words, 100);
        assert_eq!(config.paths.unwrap().home.as_deref(), Some("./state"));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.yaml");
        std::fs::write(&config_path, "version: \"1.0\"\n").unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert!(config.story.is_none());
        assert!(config.model.is_none());
        assert!(config.compaction.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/story/.chronicle");

        assert_eq!(
            resolve_path(&base, "./state"),
            PathBuf::from("/home/user/story/.chronicle/./state")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/state"),
            PathBuf::from("/absolute/state")
        );
    }

    #[test]
    fn test_default_story_start() {
        assert_eq!(
            default_story_start(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }
}

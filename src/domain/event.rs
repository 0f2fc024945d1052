//! Narrative timeline events.
//!
//! Events are the unit of story memory. Each one records what happened
//! over a span of story time, which chapter produced it, how important it
//! is, and how much detail is currently retained. Events are never
//! re-identified: compaction mutates fields in place, it never replaces
//! the event.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TimelineError;

/// Plot importance assigned at extraction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    /// Higher importance wins on merge.
    pub fn max(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

/// Age-based classification relative to the latest known story time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Current,
    Recent,
    Historical,
}

impl Tier {
    /// Ordinal age: tiers only ever advance toward `Historical`.
    pub fn age(self) -> u8 {
        match self {
            Self::Current => 0,
            Self::Recent => 1,
            Self::Historical => 2,
        }
    }

    /// The older of two tiers. Re-tiering never rejuvenates an event.
    pub fn older(self, other: Self) -> Self {
        if self.age() >= other.age() {
            self
        } else {
            other
        }
    }
}

/// How much stored detail an event currently retains.
///
/// The partial order is `Full > Light > Heavy > Minimal`; compaction only
/// moves an event downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Full,
    Light,
    Heavy,
    Minimal,
}

impl DetailLevel {
    pub fn rank(self) -> u8 {
        match self {
            Self::Full => 3,
            Self::Light => 2,
            Self::Heavy => 1,
            Self::Minimal => 0,
        }
    }

    /// True when `self` retains strictly less detail than `other`.
    pub fn is_below(self, other: Self) -> bool {
        self.rank() < other.rank()
    }
}

/// A raw event as produced by the extraction stages, before the engine
/// assigns identity and tiering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub date_start: String,
    pub date_end: String,
    pub summary: String,
    #[serde(default)]
    pub key_events: Vec<String>,
    #[serde(default)]
    pub character_development: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub symbols_motifs: Vec<String>,
    pub importance: Importance,
}

/// One event on the story timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Stable identity, assigned once at ingest.
    pub id: Uuid,

    pub date_start: NaiveDateTime,
    pub date_end: NaiveDateTime,

    pub summary: String,
    pub key_events: Vec<String>,
    pub character_development: Vec<String>,
    pub locations: Vec<String>,
    pub symbols_motifs: Vec<String>,

    pub importance: Importance,

    /// Current age tier; advances monotonically.
    pub tier: Tier,

    /// Detail currently retained; reduces monotonically.
    pub detail: DetailLevel,

    /// Set once any reduction below `Full` has been applied; never reset.
    pub compacted: bool,

    /// Chapter whose pipeline run produced this event.
    pub source_chapter: u32,
}

impl TimelineEvent {
    /// Build a timeline event from extracted data, parsing story dates.
    pub fn from_incoming(incoming: IncomingEvent, source_chapter: u32) -> Result<Self, TimelineError> {
        let date_start = parse_story_date(&incoming.date_start)
            .ok_or_else(|| TimelineError::BadDate {
                field: "date_start".to_string(),
                value: incoming.date_start.clone(),
            })?;
        let date_end = parse_story_date(&incoming.date_end)
            .ok_or_else(|| TimelineError::BadDate {
                field: "date_end".to_string(),
                value: incoming.date_end.clone(),
            })?;

        if date_start > date_end {
            return Err(TimelineError::InvertedDates {
                date_start: incoming.date_start,
                date_end: incoming.date_end,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            date_start,
            date_end,
            summary: incoming.summary,
            key_events: incoming.key_events,
            character_development: incoming.character_development,
            locations: incoming.locations,
            symbols_motifs: incoming.symbols_motifs,
            importance: incoming.importance,
            tier: Tier::Current,
            detail: DetailLevel::Full,
            compacted: false,
            source_chapter,
        })
    }

    /// Whether `other` may be merged into this event: identical date span
    /// and the same normalized summary. Events from different dates are
    /// never merged regardless of content similarity.
    pub fn is_merge_candidate(&self, other: &Self) -> bool {
        self.date_start == other.date_start
            && self.date_end == other.date_end
            && normalize_summary(&self.summary) == normalize_summary(&other.summary)
    }

    /// Fold `other` into this event: list fields become the union (stored
    /// order preserved, duplicates dropped), importance takes the higher
    /// of the two. The merged-in event ceases to exist.
    pub fn merge_from(&mut self, other: Self) {
        union_into(&mut self.key_events, other.key_events);
        union_into(&mut self.character_development, other.character_development);
        union_into(&mut self.locations, other.locations);
        union_into(&mut self.symbols_motifs, other.symbols_motifs);
        self.importance = self.importance.max(other.importance);
    }

    /// Total stored list cardinality, used by compaction monotonicity checks.
    pub fn list_cardinality(&self) -> usize {
        self.key_events.len()
            + self.character_development.len()
            + self.locations.len()
            + self.symbols_motifs.len()
    }
}

fn union_into(target: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// Normalize a summary for merge comparison: lowercase, punctuation
/// stripped, whitespace collapsed.
pub fn normalize_summary(summary: &str) -> String {
    let lowered = summary.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a story date as emitted by the timing stage. Accepts a datetime
/// with or without seconds, or a bare date (midnight).
pub fn parse_story_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

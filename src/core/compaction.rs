//! Temporal compaction of the story timeline.
//!
//! The engine owns the timeline: chapters append batches of events, every
//! event is classified into an age tier against the latest known story
//! time, and stored detail is progressively reduced as events age. Three
//! rules hold across every pass: events are never reordered, never
//! duplicated, and never dropped; tiers only advance; detail only shrinks.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::{
    DetailLevel, Importance, IncomingEvent, RecapDocument, Tier, TimelineEvent,
};
use crate::error::TimelineError;

use super::event_log::EventLog;

/// Word and list-size targets for one detail level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetailTargets {
    pub max_summary_words: usize,
    pub max_list_items: usize,
}

/// Configurable reduction targets per detail level. `Full` keeps
/// everything, so it carries no targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompactionPolicy {
    pub light: DetailTargets,
    pub heavy: DetailTargets,
    pub minimal: DetailTargets,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            light: DetailTargets {
                max_summary_words: 80,
                max_list_items: 6,
            },
            heavy: DetailTargets {
                max_summary_words: 40,
                max_list_items: 3,
            },
            minimal: DetailTargets {
                max_summary_words: 16,
                max_list_items: 1,
            },
        }
    }
}

impl CompactionPolicy {
    fn targets(&self, level: DetailLevel) -> Option<DetailTargets> {
        match level {
            DetailLevel::Full => None,
            DetailLevel::Light => Some(self.light),
            DetailLevel::Heavy => Some(self.heavy),
            DetailLevel::Minimal => Some(self.minimal),
        }
    }
}

/// What one chapter ingest did.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub merged: usize,
    /// True when the chapter was already ingested and the batch was a no-op.
    pub replayed: bool,
}

/// Tier for an event whose span ended at `date_end`, judged at story time
/// `now`.
pub fn tier_for(now: NaiveDateTime, date_end: NaiveDateTime) -> Tier {
    let age = now - date_end;
    if age < Duration::days(1) {
        Tier::Current
    } else if age <= Duration::days(7) {
        Tier::Recent
    } else {
        Tier::Historical
    }
}

/// Target detail level for a `(tier, importance)` pair.
pub fn detail_for(tier: Tier, importance: Importance) -> DetailLevel {
    match (tier, importance) {
        (Tier::Current, Importance::High) => DetailLevel::Full,
        (Tier::Current, Importance::Medium) => DetailLevel::Light,
        (Tier::Current, Importance::Low) => DetailLevel::Heavy,
        (Tier::Recent, Importance::High) => DetailLevel::Light,
        (Tier::Recent, Importance::Medium) => DetailLevel::Heavy,
        (Tier::Recent, Importance::Low) => DetailLevel::Minimal,
        (Tier::Historical, Importance::High) => DetailLevel::Heavy,
        (Tier::Historical, Importance::Medium) => DetailLevel::Minimal,
        (Tier::Historical, Importance::Low) => DetailLevel::Minimal,
    }
}

/// Cut `text` to at most `max_words` words. Never grows the text.
fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[..max_words].join(" ")
}

/// The timeline owner: ingests chapter batches, re-tiers, compacts, and
/// renders recaps.
pub struct TemporalCompactionEngine {
    log: EventLog,
    policy: CompactionPolicy,
    events: Vec<TimelineEvent>,
    /// Latest known story time: the maximum `date_end` ever ingested.
    /// Advances only, so tiers can never regress on replay.
    story_now: Option<NaiveDateTime>,
    latest_chapter: Option<u32>,
}

impl TemporalCompactionEngine {
    /// Open the engine over a story's timeline log, replaying stored state.
    pub async fn open(log: EventLog, policy: CompactionPolicy) -> Result<Self, TimelineError> {
        let events = log.load().await?;
        let story_now = events.iter().map(|e| e.date_end).max();
        let latest_chapter = events.iter().map(|e| e.source_chapter).max();

        Ok(Self {
            log,
            policy,
            events,
            story_now,
            latest_chapter,
        })
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn story_now(&self) -> Option<NaiveDateTime> {
        self.story_now
    }

    pub fn latest_chapter(&self) -> Option<u32> {
        self.latest_chapter
    }

    /// Ingest one chapter's batch, re-tier the whole timeline, and persist.
    ///
    /// This is the once-per-chapter entry point used by the recap
    /// pipeline's `compact_events` stage.
    #[instrument(skip(self, incoming), fields(batch = incoming.len()))]
    pub fn advance_chapter(
        &mut self,
        chapter: u32,
        incoming: Vec<IncomingEvent>,
    ) -> Result<IngestReport, TimelineError> {
        let report = self.ingest_chapter(chapter, incoming)?;
        self.retier();
        self.log.save(&self.events)?;

        info!(
            chapter,
            inserted = report.inserted,
            merged = report.merged,
            replayed = report.replayed,
            total = self.events.len(),
            "timeline advanced"
        );
        Ok(report)
    }

    /// Append one chapter's events without persisting.
    ///
    /// Chapters must arrive in non-decreasing order; replaying the latest
    /// chapter is an idempotent no-op so a resumed pipeline run can pass
    /// through without mutating the timeline.
    pub fn ingest_chapter(
        &mut self,
        chapter: u32,
        incoming: Vec<IncomingEvent>,
    ) -> Result<IngestReport, TimelineError> {
        if let Some(latest) = self.latest_chapter {
            if chapter < latest {
                return Err(TimelineError::OutOfOrderChapter {
                    given: chapter,
                    latest,
                });
            }
            if chapter == latest {
                debug!(chapter, "chapter already ingested, replay is a no-op");
                return Ok(IngestReport {
                    replayed: true,
                    ..IngestReport::default()
                });
            }
        }

        let mut report = IngestReport::default();

        // Fold merge-candidates within the batch first, so the model
        // emitting the same beat twice does not duplicate it.
        let mut batch: Vec<TimelineEvent> = Vec::with_capacity(incoming.len());
        for raw in incoming {
            let event = TimelineEvent::from_incoming(raw, chapter)?;
            if let Some(existing) = batch.iter_mut().find(|e| e.is_merge_candidate(&event)) {
                existing.merge_from(event);
                report.merged += 1;
            } else {
                batch.push(event);
            }
        }

        // Then fold against stored events and insert the rest in
        // `(date_start, insertion order)` position.
        for event in batch {
            if let Some(existing) = self
                .events
                .iter_mut()
                .find(|e| e.is_merge_candidate(&event))
            {
                existing.merge_from(event);
                report.merged += 1;
                continue;
            }

            self.story_now = Some(match self.story_now {
                Some(now) => now.max(event.date_end),
                None => event.date_end,
            });

            let position = self
                .events
                .partition_point(|e| e.date_start <= event.date_start);
            self.events.insert(position, event);
            report.inserted += 1;
        }

        self.latest_chapter = Some(chapter);
        Ok(report)
    }

    /// Re-derive tier and detail for every stored event against the
    /// current story time. Runs over the entire timeline because `now`
    /// advances with every chapter and previously-current events may need
    /// to demote. Never changes the event count.
    pub fn retier(&mut self) {
        let Some(now) = self.story_now else {
            return;
        };

        for event in &mut self.events {
            let tier = event.tier.older(tier_for(now, event.date_end));
            event.tier = tier;

            let target = detail_for(tier, event.importance);
            if target.is_below(event.detail) {
                apply_detail(event, target, &self.policy);
            }
        }
    }

    /// Render the current tiered view. Pure: never compacts, never
    /// mutates.
    pub fn render(&self) -> RecapDocument {
        RecapDocument::from_events(&self.events)
    }
}

/// Reduce an event's stored fields to the targets for `level`.
fn apply_detail(event: &mut TimelineEvent, level: DetailLevel, policy: &CompactionPolicy) {
    if let Some(targets) = policy.targets(level) {
        event.summary = truncate_words(&event.summary, targets.max_summary_words);
        event.key_events.truncate(targets.max_list_items);
        event
            .character_development
            .truncate(targets.max_list_items);
        event.locations.truncate(targets.max_list_items);
        event.symbols_motifs.truncate(targets.max_list_items);
        event.compacted = true;
    }
    event.detail = level;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::parse_story_date;

    fn at(value: &str) -> NaiveDateTime {
        parse_story_date(value).unwrap()
    }

    #[test]
    fn test_tier_thresholds() {
        let now = at("2024-01-11 09:00");

        // Same day, under 24h: current.
        assert_eq!(tier_for(now, at("2024-01-11 09:00")), Tier::Current);
        assert_eq!(tier_for(now, at("2024-01-10 10:00")), Tier::Current);

        // Exactly one day: recent.
        assert_eq!(tier_for(now, at("2024-01-10 09:00")), Tier::Recent);

        // Exactly seven days: still recent.
        assert_eq!(tier_for(now, at("2024-01-04 09:00")), Tier::Recent);

        // Beyond seven days: historical.
        assert_eq!(tier_for(now, at("2024-01-04 08:59")), Tier::Historical);
        assert_eq!(tier_for(now, at("2023-12-01")), Tier::Historical);
    }

    #[test]
    fn test_detail_matrix() {
        assert_eq!(detail_for(Tier::Current, Importance::High), DetailLevel::Full);
        assert_eq!(detail_for(Tier::Current, Importance::Medium), DetailLevel::Light);
        assert_eq!(detail_for(Tier::Current, Importance::Low), DetailLevel::Heavy);
        assert_eq!(detail_for(Tier::Recent, Importance::High), DetailLevel::Light);
        assert_eq!(detail_for(Tier::Recent, Importance::Medium), DetailLevel::Heavy);
        assert_eq!(detail_for(Tier::Recent, Importance::Low), DetailLevel::Minimal);
        assert_eq!(detail_for(Tier::Historical, Importance::High), DetailLevel::Heavy);
        assert_eq!(detail_for(Tier::Historical, Importance::Medium), DetailLevel::Minimal);
        assert_eq!(detail_for(Tier::Historical, Importance::Low), DetailLevel::Minimal);
    }

    #[test]
    fn test_truncate_words_never_grows() {
        assert_eq!(truncate_words("one two three", 5), "one two three");
        assert_eq!(truncate_words("one two three four five six", 3), "one two three");
        assert_eq!(truncate_words("", 3), "");
    }

    #[test]
    fn test_tier_purity_is_idempotent() {
        let now = at("2024-01-11 00:00");
        let end = at("2024-01-08 00:00");
        let first = tier_for(now, end);
        let second = tier_for(now, end);
        assert_eq!(first, second);
        assert_eq!(first, Tier::Recent);
    }
}

//! The recap document exposed to downstream pipeline stages.
//!
//! A recap is a pure view over the timeline's current state: three tiered
//! sections, each an ordered list of event views serialized from the
//! already-compacted fields. Building a recap never mutates the timeline.

use serde::{Deserialize, Serialize};

use super::event::{Tier, TimelineEvent};

/// One event as rendered into a recap section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventView {
    pub date_start: String,
    pub date_end: String,
    pub summary: String,
    pub key_events: Vec<String>,
    pub character_development: Vec<String>,
    pub locations: Vec<String>,
    pub symbols_motifs: Vec<String>,
}

impl From<&TimelineEvent> for EventView {
    fn from(event: &TimelineEvent) -> Self {
        Self {
            date_start: event.date_start.format(DATE_FORMAT).to_string(),
            date_end: event.date_end.format(DATE_FORMAT).to_string(),
            summary: event.summary.clone(),
            key_events: event.key_events.clone(),
            character_development: event.character_development.clone(),
            locations: event.locations.clone(),
            symbols_motifs: event.symbols_motifs.clone(),
        }
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// The three-section recap consumed by outline and chapter generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecapDocument {
    pub historical_context: Vec<EventView>,
    pub recent_events: Vec<EventView>,
    pub current_chapter: Vec<EventView>,
}

impl RecapDocument {
    /// Assemble a recap from events already ordered by
    /// `(date_start, insertion order)`.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a TimelineEvent>) -> Self {
        let mut doc = Self::default();
        for event in events {
            let view = EventView::from(event);
            match event.tier {
                Tier::Historical => doc.historical_context.push(view),
                Tier::Recent => doc.recent_events.push(view),
                Tier::Current => doc.current_chapter.push(view),
            }
        }
        doc
    }

    pub fn event_count(&self) -> usize {
        self.historical_context.len() + self.recent_events.len() + self.current_chapter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Importance, IncomingEvent, TimelineEvent};

    fn event(end: &str, tier: Tier) -> TimelineEvent {
        let mut e = TimelineEvent::from_incoming(
            IncomingEvent {
                date_start: end.to_string(),
                date_end: end.to_string(),
                summary: format!("event at {}", end),
                key_events: vec![],
                character_development: vec![],
                locations: vec![],
                symbols_motifs: vec![],
                importance: Importance::Medium,
            },
            1,
        )
        .unwrap();
        e.tier = tier;
        e
    }

    #[test]
    fn test_sections_group_by_tier() {
        let events = vec![
            event("2024-01-01", Tier::Historical),
            event("2024-01-08", Tier::Recent),
            event("2024-01-10", Tier::Recent),
            event("2024-01-11", Tier::Current),
        ];

        let doc = RecapDocument::from_events(&events);

        assert_eq!(doc.historical_context.len(), 1);
        assert_eq!(doc.recent_events.len(), 2);
        assert_eq!(doc.current_chapter.len(), 1);
        assert_eq!(doc.event_count(), 4);
        assert_eq!(doc.recent_events[0].date_start, "2024-01-08 00:00");
    }

    #[test]
    fn test_rendering_preserves_order_within_sections() {
        let events = vec![
            event("2024-01-08", Tier::Recent),
            event("2024-01-09", Tier::Recent),
            event("2024-01-10", Tier::Recent),
        ];

        let doc = RecapDocument::from_events(&events);
        let dates: Vec<&str> = doc
            .recent_events
            .iter()
            .map(|v| v.date_start.as_str())
            .collect();
        assert_eq!(
            dates,
            vec!["2024-01-08 00:00", "2024-01-09 00:00", "2024-01-10 00:00"]
        );
    }
}

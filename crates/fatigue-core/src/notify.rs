//! Outbound level notifications.
//!
//! The engine announces level changes to every consumer slot named in the
//! configuration. Consumers are late-bound: a slot may be declared long
//! before anything is attached to it, and the engine must never assume it
//! is filled. [`ConsumerRegistry::try_get`] is the only way in; a miss is
//! handled by the caller through the bounded retry queue.
//!
//! # Bundled sinks
//!
//! - [`TracingSink`] -- logs each callback.
//! - [`JsonLinesSink`] -- one JSON object per callback to any writer.
//! - [`LevelBoard`] -- display store of level and next-change instant per
//!   entity, readable through a cloned handle.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use fatigue_types::{EntityId, FatigueLevel, LevelError, LevelNotification};
use serde::Serialize;

/// A consumer of level-change notifications.
pub trait NotificationSink {
    /// The entity's level changed to `level`.
    fn on_fatigue_level(&mut self, entity: &EntityId, level: FatigueLevel);

    /// The entity's level is next expected to change at `at`.
    fn on_next_level_time(&mut self, entity: &EntityId, at: DateTime<Utc>);

    /// No further change is scheduled for the entity.
    fn on_level_time_cleared(&mut self, entity: &EntityId);

    /// Deliver a complete notification: the level first, then either the
    /// next-change instant or the clear.
    fn deliver(&mut self, notification: &LevelNotification) {
        self.on_fatigue_level(&notification.entity, notification.level);
        match notification.next_change_at {
            Some(at) => self.on_next_level_time(&notification.entity, at),
            None => self.on_level_time_cleared(&notification.entity),
        }
    }
}

/// Named consumer slots, each empty until something attaches.
#[derive(Default)]
pub struct ConsumerRegistry {
    slots: BTreeMap<String, Option<Box<dyn NotificationSink>>>,
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots: BTreeMap<&str, bool> = self
            .slots
            .iter()
            .map(|(name, sink)| (name.as_str(), sink.is_some()))
            .collect();
        f.debug_struct("ConsumerRegistry")
            .field("attached", &slots)
            .finish()
    }
}

impl ConsumerRegistry {
    /// Create a registry with one empty slot per name.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: names.into_iter().map(|n| (n.into(), None)).collect(),
        }
    }

    /// Fill the slot `name`, declaring it if needed. Returns the sink it
    /// replaced, if any.
    pub fn attach(
        &mut self,
        name: impl Into<String>,
        sink: Box<dyn NotificationSink>,
    ) -> Option<Box<dyn NotificationSink>> {
        let name = name.into();
        tracing::debug!(consumer = %name, "Consumer attached");
        self.slots.insert(name, Some(sink)).flatten()
    }

    /// The sink attached to `name`, if the slot exists and is filled.
    pub fn try_get(&mut self, name: &str) -> Option<&mut dyn NotificationSink> {
        match self.slots.get_mut(name) {
            Some(Some(sink)) => Some(sink.as_mut()),
            _ => None,
        }
    }

    /// Whether `name` has a sink attached.
    pub fn is_attached(&self, name: &str) -> bool {
        self.slots.get(name).is_some_and(Option::is_some)
    }

    /// Every declared slot name.
    pub fn names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }
}

/// Logs every callback at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn on_fatigue_level(&mut self, entity: &EntityId, level: FatigueLevel) {
        tracing::info!(entity = %entity, level = level.value(), "Fatigue level changed");
    }

    fn on_next_level_time(&mut self, entity: &EntityId, at: DateTime<Utc>) {
        tracing::info!(entity = %entity, next_change_at = %at, "Next level change scheduled");
    }

    fn on_level_time_cleared(&mut self, entity: &EntityId) {
        tracing::info!(entity = %entity, "No further level change scheduled");
    }
}

/// One line written by [`JsonLinesSink`].
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SinkLine<'a> {
    FatigueLevel {
        entity: &'a EntityId,
        level: FatigueLevel,
    },
    NextLevelTime {
        entity: &'a EntityId,
        at: DateTime<Utc>,
    },
    LevelTimeCleared {
        entity: &'a EntityId,
    },
}

/// Writes one JSON object per callback, newline-terminated.
///
/// Write failures are logged and otherwise ignored; a broken output must
/// not stall the engine.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wrap a writer.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &SinkLine<'_>) {
        let result = serde_json::to_writer(&mut self.out, line)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write notification line");
        }
    }
}

impl<W: Write> NotificationSink for JsonLinesSink<W> {
    fn on_fatigue_level(&mut self, entity: &EntityId, level: FatigueLevel) {
        self.write_line(&SinkLine::FatigueLevel { entity, level });
    }

    fn on_next_level_time(&mut self, entity: &EntityId, at: DateTime<Utc>) {
        self.write_line(&SinkLine::NextLevelTime { entity, at });
    }

    fn on_level_time_cleared(&mut self, entity: &EntityId) {
        self.write_line(&SinkLine::LevelTimeCleared { entity });
    }
}

/// What the board shows for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardEntry {
    /// Last level shown.
    pub level: FatigueLevel,
    /// When the level is next expected to change, if known.
    pub next_change_at: Option<DateTime<Utc>>,
}

/// Display store: the level and next-change instant per entity.
///
/// Clones share the same board, so the host can keep a read handle while
/// the engine owns the attached copy.
#[derive(Debug, Clone, Default)]
pub struct LevelBoard {
    entries: Arc<Mutex<BTreeMap<EntityId, BoardEntry>>>,
}

impl LevelBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// What is shown for `entity`, if anything.
    pub fn get(&self, entity: &EntityId) -> Option<BoardEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .copied()
    }

    /// Copy of the whole board.
    pub fn snapshot(&self) -> BTreeMap<EntityId, BoardEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Show an externally supplied level.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::OutOfRange`] (and logs a warning) if `raw` is
    /// outside `0..=LEVELS`; the board is left unchanged.
    pub fn set_level(&self, entity: &EntityId, raw: i64) -> Result<(), LevelError> {
        let level = FatigueLevel::new(raw).inspect_err(|e| {
            tracing::warn!(entity = %entity, error = %e, "Rejected out-of-range level");
        })?;
        self.on_level(entity, level);
        Ok(())
    }

    fn on_level(&self, entity: &EntityId, level: FatigueLevel) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(entity.clone())
            .and_modify(|e| e.level = level)
            .or_insert(BoardEntry {
                level,
                next_change_at: None,
            });
    }

    fn on_next(&self, entity: &EntityId, at: Option<DateTime<Utc>>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(entity) {
            entry.next_change_at = at;
        }
    }
}

impl NotificationSink for LevelBoard {
    fn on_fatigue_level(&mut self, entity: &EntityId, level: FatigueLevel) {
        self.on_level(entity, level);
    }

    fn on_next_level_time(&mut self, entity: &EntityId, at: DateTime<Utc>) {
        self.on_next(entity, Some(at));
    }

    fn on_level_time_cleared(&mut self, entity: &EntityId) {
        self.on_next(entity, None);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn empty_slot_yields_nothing() {
        let mut registry = ConsumerRegistry::new(["display", "gather"]);
        assert!(registry.try_get("display").is_none());
        assert!(registry.try_get("unknown").is_none());
        assert!(!registry.is_attached("display"));
        assert_eq!(registry.names(), vec!["display", "gather"]);
    }

    #[test]
    fn attach_fills_and_replaces_slots() {
        let mut registry = ConsumerRegistry::new(["display"]);
        assert!(registry.attach("display", Box::new(TracingSink)).is_none());
        assert!(registry.try_get("display").is_some());
        assert!(registry.attach("display", Box::new(TracingSink)).is_some());

        // Attaching an undeclared name declares it.
        registry.attach("gather", Box::new(TracingSink));
        assert!(registry.is_attached("gather"));
        assert_eq!(registry.names(), vec!["display", "gather"]);
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_callback() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.deliver(&LevelNotification {
            entity: id("p1"),
            level: FatigueLevel::new(3).unwrap(),
            next_change_at: Some(at("2026-03-01T13:00:00Z")),
        });
        sink.deliver(&LevelNotification::cleared(id("p1")));

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["event"], "fatigue_level");
        assert_eq!(lines[0]["level"], 3);
        assert_eq!(lines[1]["event"], "next_level_time");
        assert_eq!(lines[2]["level"], 0);
        assert_eq!(lines[3]["event"], "level_time_cleared");
        assert_eq!(lines[3]["entity"], "p1");
    }

    #[test]
    fn board_tracks_level_and_next_change() {
        let board = LevelBoard::new();
        let mut attached = board.clone();
        attached.deliver(&LevelNotification {
            entity: id("p1"),
            level: FatigueLevel::new(2).unwrap(),
            next_change_at: Some(at("2026-03-01T13:00:00Z")),
        });
        let shown = board.get(&id("p1")).unwrap();
        assert_eq!(shown.level.value(), 2);
        assert_eq!(shown.next_change_at, Some(at("2026-03-01T13:00:00Z")));

        attached.deliver(&LevelNotification::cleared(id("p1")));
        let shown = board.get(&id("p1")).unwrap();
        assert_eq!(shown.level, FatigueLevel::ZERO);
        assert_eq!(shown.next_change_at, None);
    }

    #[test]
    fn board_rejects_out_of_range_levels() {
        let board = LevelBoard::new();
        board.set_level(&id("p1"), 4).unwrap();
        assert!(board.set_level(&id("p1"), 9).is_err());
        assert!(board.set_level(&id("p1"), -1).is_err());
        assert_eq!(board.get(&id("p1")).unwrap().level.value(), 4);
    }
}

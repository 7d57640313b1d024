//! One-shot boundary timers, at most one per entity.
//!
//! A timer is a value: the entity id and the instant it is due. There is
//! no callback to capture; when a timer fires the engine re-services the
//! entity it names. Scheduling for an entity that already has a timer
//! replaces it, so the one-timer-per-entity invariant holds by
//! construction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fatigue_types::EntityId;

/// Outstanding boundary timers keyed by entity.
#[derive(Debug, Clone, Default)]
pub struct TimerService {
    due: BTreeMap<EntityId, DateTime<Utc>>,
}

impl TimerService {
    /// Create a service with no timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` to fire at `at`, replacing any timer it already had.
    pub fn schedule(&mut self, id: EntityId, at: DateTime<Utc>) {
        if let Some(previous) = self.due.insert(id, at) {
            tracing::trace!(previous = %previous, due = %at, "Replaced outstanding timer");
        }
    }

    /// Cancel the timer for `id`. Cancelling nothing is fine.
    ///
    /// Returns whether a timer was outstanding.
    pub fn cancel(&mut self, id: &EntityId) -> bool {
        self.due.remove(id).is_some()
    }

    /// Whether `id` has an outstanding timer.
    pub fn is_scheduled(&self, id: &EntityId) -> bool {
        self.due.contains_key(id)
    }

    /// When the timer for `id` is due, if one is outstanding.
    pub fn deadline(&self, id: &EntityId) -> Option<DateTime<Utc>> {
        self.due.get(id).copied()
    }

    /// Number of outstanding timers.
    pub fn outstanding(&self) -> usize {
        self.due.len()
    }

    /// Earliest outstanding deadline.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.due.values().min().copied()
    }

    /// Remove and return every entity whose timer is due at or before
    /// `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<EntityId> {
        let mut fired: Vec<(DateTime<Utc>, EntityId)> = Vec::new();
        self.due.retain(|id, at| {
            if *at <= now {
                fired.push((*at, id.clone()));
                false
            } else {
                true
            }
        });
        fired.sort();
        fired.into_iter().map(|(_, id)| id).collect()
    }
}

//! What the engine may ask about an entity's session.
//!
//! The engine owns fatigue state, not sessions. It only needs to know
//! whether an entity is online, still loading, awake, asleep or dead: the
//! sweep uses that to find offline entities and the deferred death and
//! connect actions use it as their readiness predicate.

use std::collections::BTreeMap;

use fatigue_types::{EntityId, LifecycleEvent};
use serde::{Deserialize, Serialize};

/// Session state of one entity as seen by the presence view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Not connected.
    Offline,
    /// Connected, initial snapshot still loading.
    Loading,
    /// Connected and awake.
    Awake,
    /// Connected and asleep.
    Sleeping,
    /// Connected and dead.
    Dead,
}

impl PresenceStatus {
    /// Whether the entity is connected at all.
    pub const fn is_online(self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// Read-only view of entity sessions.
pub trait Presence {
    /// Current session state of `id`.
    fn status(&self, id: &EntityId) -> PresenceStatus;

    /// See a lifecycle event before the engine acts on it.
    ///
    /// Views fed from elsewhere can ignore this.
    fn observe(&mut self, event: &LifecycleEvent) {
        let _ = event;
    }
}

/// In-memory presence view maintained from lifecycle events.
///
/// Unknown entities are [`PresenceStatus::Offline`].
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: BTreeMap<EntityId, PresenceStatus>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the status of `id`. Setting [`PresenceStatus::Offline`]
    /// forgets the entity.
    pub fn set(&mut self, id: EntityId, status: PresenceStatus) {
        if status == PresenceStatus::Offline {
            self.sessions.remove(&id);
        } else {
            self.sessions.insert(id, status);
        }
    }

    /// Update the table from one lifecycle event.
    pub fn apply(&mut self, event: &LifecycleEvent) {
        let (id, status) = match event {
            LifecycleEvent::BecameActive { id } => (id, PresenceStatus::Awake),
            LifecycleEvent::BecameInactive { id } | LifecycleEvent::Loaded { id } => {
                (id, PresenceStatus::Sleeping)
            }
            LifecycleEvent::Observed { id, active } => (
                id,
                if *active {
                    PresenceStatus::Awake
                } else {
                    PresenceStatus::Sleeping
                },
            ),
            LifecycleEvent::Connected { id } => (id, PresenceStatus::Loading),
            LifecycleEvent::Disconnected { id } => (id, PresenceStatus::Offline),
            LifecycleEvent::Died { id } => (id, PresenceStatus::Dead),
            LifecycleEvent::ConsumerAttached { .. } => return,
        };
        self.set(id.clone(), status);
    }
}

impl Presence for SessionTable {
    fn status(&self, id: &EntityId) -> PresenceStatus {
        self.sessions
            .get(id)
            .copied()
            .unwrap_or(PresenceStatus::Offline)
    }

    fn observe(&mut self, event: &LifecycleEvent) {
        self.apply(event);
    }
}

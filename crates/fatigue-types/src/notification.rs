//! Outbound level-change notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::record::FatigueLevel;

/// A level change for one entity, as handed to notification consumers.
///
/// `next_change_at` is the predicted instant of the following level
/// change. It is `None` when nothing further is scheduled: the cap was
/// reached while active, or fatigue fully decayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelNotification {
    /// The entity whose level changed.
    pub entity: EntityId,
    /// The new level.
    pub level: FatigueLevel,
    /// When the level is next expected to change, if at all.
    pub next_change_at: Option<DateTime<Utc>>,
}

impl LevelNotification {
    /// The final notification for an entity whose fatigue fully decayed.
    pub const fn cleared(entity: EntityId) -> Self {
        Self {
            entity,
            level: FatigueLevel::ZERO,
            next_change_at: None,
        }
    }
}

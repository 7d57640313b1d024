//! Inbound lifecycle events produced by the session layer.
//!
//! Events arrive as line-delimited JSON in the host binary, tagged by
//! `event`:
//!
//! ```json
//! {"event":"became_active","id":"76561198000000001"}
//! {"event":"observed","id":"76561198000000002","active":false}
//! {"event":"consumer_attached","name":"display"}
//! ```

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Something the session layer observed about an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The entity woke up (sleep ended) and is now eligible to accrue.
    BecameActive {
        /// The entity.
        id: EntityId,
    },
    /// The entity fell asleep.
    BecameInactive {
        /// The entity.
        id: EntityId,
    },
    /// Startup seeding for an entity that was already connected.
    Observed {
        /// The entity.
        id: EntityId,
        /// Whether it is awake and alive right now.
        active: bool,
    },
    /// The entity connected and started receiving its initial snapshot.
    Connected {
        /// The entity.
        id: EntityId,
    },
    /// The entity finished loading after connecting.
    Loaded {
        /// The entity.
        id: EntityId,
    },
    /// The entity disconnected.
    Disconnected {
        /// The entity.
        id: EntityId,
    },
    /// The entity died. Death state may take a moment to settle.
    Died {
        /// The entity.
        id: EntityId,
    },
    /// A notification consumer became available.
    ConsumerAttached {
        /// Name of the consumer slot.
        name: String,
    },
}

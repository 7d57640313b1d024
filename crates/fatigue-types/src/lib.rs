//! Shared type definitions for the fatigue accrual engine.
//!
//! # Modules
//!
//! - [`ids`] -- The [`EntityId`] newtype keying every record
//! - [`record`] -- [`FatigueRecord`], [`FatigueState`], [`FatigueLevel`] and
//!   the level constants
//! - [`notification`] -- [`LevelNotification`] delivered to consumers
//! - [`lifecycle`] -- [`LifecycleEvent`] produced by the session layer

pub mod ids;
pub mod lifecycle;
pub mod notification;
pub mod record;

// Re-export all public types at crate root for convenience.
pub use ids::{EntityId, IdError};
pub use lifecycle::LifecycleEvent;
pub use notification::LevelNotification;
pub use record::{
    FatigueLevel, FatigueRecord, FatigueState, LEVELS, LevelError, MAX_SECONDS,
    SECONDS_PER_LEVEL, clamp_seconds, elapsed_seconds,
};

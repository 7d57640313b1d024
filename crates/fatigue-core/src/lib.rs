//! Per-entity fatigue accrual engine.
//!
//! Tracks how long each entity has been active versus inactive, turns the
//! accumulated active time into a level in `0..=LEVELS`, schedules the
//! exact instant of the next level change, survives restarts without
//! losing accrued time, and announces every level change to the attached
//! consumers.
//!
//! # Modules
//!
//! - [`clock`] -- [`ClockSource`] with the system and manual clocks.
//! - [`config`] -- Configuration loading from `fatigue-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- [`FatigueEngine`], the state machine and persistence.
//! - [`level`] -- Next-boundary arithmetic and fire-delay rounding.
//! - [`notify`] -- [`NotificationSink`], the consumer registry and the
//!   bundled sinks.
//! - [`presence`] -- [`Presence`] view and the in-memory
//!   [`SessionTable`].
//! - [`retry`] -- Bounded retry queue for actions waiting on something
//!   outside the engine.
//! - [`runner`] -- [`EngineDriver`], the async host loop.
//! - [`timer`] -- One-shot boundary timers, at most one per entity.
//!
//! [`ClockSource`]: clock::ClockSource
//! [`FatigueEngine`]: engine::FatigueEngine
//! [`NotificationSink`]: notify::NotificationSink
//! [`Presence`]: presence::Presence
//! [`SessionTable`]: presence::SessionTable
//! [`EngineDriver`]: runner::EngineDriver

pub mod clock;
pub mod config;
pub mod engine;
pub mod level;
pub mod notify;
pub mod presence;
pub mod retry;
pub mod runner;
pub mod timer;

// Re-export primary types for convenience.
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::{ConfigError, FatigueConfig};
pub use engine::{Deferred, DueWork, EngineError, EngineSettings, FatigueEngine, LoadReport};
pub use notify::{
    BoardEntry, ConsumerRegistry, JsonLinesSink, LevelBoard, NotificationSink, TracingSink,
};
pub use presence::{Presence, PresenceStatus, SessionTable};
pub use retry::{RetryOutcome, RetryPolicy, RetryQueue};
pub use runner::{DriverSummary, EngineDriver};
pub use timer::TimerService;

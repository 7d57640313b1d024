//! Per-entity fatigue state and the derived level.
//!
//! A [`FatigueRecord`] never stores the live accumulated seconds. It stores
//! an *anchor*: the value that was valid at the last transition, together
//! with the instant of that transition and the direction time is flowing
//! (accruing while [`FatigueState::Active`], decaying while
//! [`FatigueState::Inactive`]). The current value is always derived from
//! the anchor and the elapsed wall-clock time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accumulated active seconds that make up one fatigue level.
pub const SECONDS_PER_LEVEL: u32 = 3600;

/// Number of levels above zero. The level range is `0..=LEVELS`.
pub const LEVELS: u8 = 8;

/// Upper bound on accumulated active seconds (`LEVELS * SECONDS_PER_LEVEL`).
pub const MAX_SECONDS: f64 = 28_800.0;

/// Errors produced when an externally supplied level is out of range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LevelError {
    /// The value lies outside `0..=LEVELS`.
    #[error("level {value} is outside the allowed range [0 - {LEVELS}]")]
    OutOfRange {
        /// The rejected value.
        value: i64,
    },
}

/// Whether an entity is currently accruing or shedding fatigue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FatigueState {
    /// Present and eligible: accumulated seconds grow with wall-clock time.
    Active,
    /// Asleep, dead, or disconnected: accumulated seconds decay.
    Inactive,
}

/// A discrete fatigue level in `0..=LEVELS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct FatigueLevel(u8);

impl FatigueLevel {
    /// Level zero: no accrued fatigue.
    pub const ZERO: Self = Self(0);

    /// The cap.
    pub const MAX: Self = Self(LEVELS);

    /// Validate an externally supplied level.
    ///
    /// # Errors
    ///
    /// Returns [`LevelError::OutOfRange`] if `value` is negative or above
    /// [`LEVELS`].
    pub fn new(value: i64) -> Result<Self, LevelError> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= LEVELS)
            .map(Self)
            .ok_or(LevelError::OutOfRange { value })
    }

    /// Derive the level for an accumulated-seconds value.
    ///
    /// `floor(seconds / SECONDS_PER_LEVEL)`, clamped into `0..=LEVELS`.
    /// NaN or negative inputs map to level zero.
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds.is_nan() || seconds <= 0.0 {
            return Self::ZERO;
        }
        let buckets = (seconds / f64::from(SECONDS_PER_LEVEL))
            .floor()
            .min(f64::from(LEVELS));
        // Clamped to 0..=LEVELS above, so the cast is lossless.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let level = buckets as u8;
        Self(level)
    }

    /// Return the raw level value.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Whether this is the cap (no further increase possible).
    pub const fn is_max(self) -> bool {
        self.0 >= LEVELS
    }

    /// Accumulated seconds at which this level begins.
    pub fn floor_seconds(self) -> f64 {
        f64::from(self.0) * f64::from(SECONDS_PER_LEVEL)
    }
}

impl TryFrom<i64> for FatigueLevel {
    type Error = LevelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FatigueLevel> for u8 {
    fn from(level: FatigueLevel) -> Self {
        level.0
    }
}

impl core::fmt::Display for FatigueLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authoritative fatigue state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FatigueRecord {
    /// Direction time is flowing for this entity.
    pub state: FatigueState,
    /// When the record last transitioned or was re-anchored.
    pub state_changed_at: DateTime<Utc>,
    /// Accumulated active seconds valid at `state_changed_at`.
    pub anchor_seconds: f64,
}

impl FatigueRecord {
    /// Create a record, clamping the anchor into `0..=MAX_SECONDS`.
    pub fn new(state: FatigueState, state_changed_at: DateTime<Utc>, anchor_seconds: f64) -> Self {
        Self {
            state,
            state_changed_at,
            anchor_seconds: clamp_seconds(anchor_seconds),
        }
    }

    /// Accumulated active seconds at `now`.
    ///
    /// Active records grow from the anchor and saturate at
    /// [`MAX_SECONDS`]; inactive records shrink and saturate at zero.
    pub fn current_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = elapsed_seconds(self.state_changed_at, now);
        let raw = match self.state {
            FatigueState::Active => self.anchor_seconds + elapsed,
            FatigueState::Inactive => self.anchor_seconds - elapsed,
        };
        clamp_seconds(raw)
    }

    /// Fatigue level at `now`.
    pub fn level_at(&self, now: DateTime<Utc>) -> FatigueLevel {
        FatigueLevel::from_seconds(self.current_seconds(now))
    }

    /// Whether this is an active record.
    pub fn is_active(&self) -> bool {
        self.state == FatigueState::Active
    }
}

/// Seconds elapsed from `from` to `to`.
///
/// A clock that stepped backwards yields zero rather than a negative gap,
/// so a skewed wall clock can neither grant nor erase accrued time.
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    to.signed_duration_since(from)
        .to_std()
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Clamp an accumulated-seconds value into `0..=MAX_SECONDS`.
pub fn clamp_seconds(seconds: f64) -> f64 {
    if seconds.is_nan() {
        return 0.0;
    }
    seconds.clamp(0.0, MAX_SECONDS)
}

//! Level boundary arithmetic.
//!
//! The engine never polls. After every recomputation it asks this module
//! for the next instant at which the level will change and schedules a
//! single timer for it.
//!
//! While accruing, the level changes the moment accumulated seconds reach
//! the next multiple of [`SECONDS_PER_LEVEL`]. While decaying, it changes
//! the moment they drop *below* the current multiple. Fire delays are
//! rounded to whole milliseconds so that a timer always lands on the far
//! side of its boundary; a timer that landed short would recompute the
//! same level and reschedule for a zero-length gap.

use chrono::{DateTime, TimeDelta, Utc};
use fatigue_types::{FatigueLevel, FatigueState, SECONDS_PER_LEVEL};

/// The next level change for a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    /// Accumulated seconds at the boundary.
    pub seconds: f64,
    /// How long until the timer for this boundary should fire.
    pub delay: TimeDelta,
}

impl Boundary {
    /// Instant the boundary timer fires when scheduled at `now`.
    pub fn due_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Find the next level boundary for a record in `state` holding `current`
/// accumulated seconds.
///
/// Returns `None` when no further change is possible in that direction:
/// an active record at the cap, or an inactive record that has fully
/// decayed.
pub fn next_boundary(state: FatigueState, current: f64) -> Option<Boundary> {
    let level = FatigueLevel::from_seconds(current);
    match state {
        FatigueState::Active => {
            if level.is_max() {
                return None;
            }
            let seconds = level.floor_seconds() + f64::from(SECONDS_PER_LEVEL);
            Some(Boundary {
                seconds,
                delay: rising_delay(seconds - current),
            })
        }
        FatigueState::Inactive => {
            if current <= 0.0 || current.is_nan() {
                return None;
            }
            let seconds = level.floor_seconds();
            Some(Boundary {
                seconds,
                delay: falling_delay(current - seconds),
            })
        }
    }
}

/// Delay until a rising boundary `gap` seconds away: rounded up to the
/// next millisecond, at least 1 ms.
pub fn rising_delay(gap: f64) -> TimeDelta {
    TimeDelta::milliseconds(whole_millis((gap * 1000.0).ceil()).max(1))
}

/// Delay until a falling boundary `gap` seconds away.
///
/// Reaching the boundary exactly still reads as the higher level, so the
/// delay is the next whole millisecond strictly past it.
pub fn falling_delay(gap: f64) -> TimeDelta {
    TimeDelta::milliseconds(whole_millis((gap * 1000.0).floor()).saturating_add(1))
}

fn whole_millis(ms: f64) -> i64 {
    if ms.is_nan() || ms <= 0.0 {
        return 0;
    }
    // Boundaries are at most one level apart, far inside i64 range.
    #[allow(clippy::cast_possible_truncation)]
    let whole = ms.min(9.0e15) as i64;
    whole
}

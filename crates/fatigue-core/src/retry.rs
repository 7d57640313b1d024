//! Bounded retry primitive.
//!
//! Some actions can only run once something outside the engine is ready:
//! a notification consumer must be attached before it can be called, a
//! death must settle before the entity reads as dead, a fresh connection
//! must finish loading. All of them share one shape: check a predicate,
//! run the action once when it holds, otherwise check again after a fixed
//! interval, and give up quietly after a fixed number of checks.
//!
//! A pending retry is a plain value, `(payload, attempts remaining, due)`.
//! Nothing is captured across the wait, so the owner of the queue decides
//! what "ready" and "run" mean each time it polls.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

/// How often and how many times to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between checks.
    pub interval: TimeDelta,
    /// Total number of checks, including the first one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn new(interval: TimeDelta, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// What happened to a submitted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The predicate held and the action ran.
    Ran,
    /// The predicate did not hold; a later check is scheduled.
    Deferred,
    /// The predicate did not hold and no checks remain.
    GaveUp,
}

/// One deferred action waiting for its predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RetryTask<T> {
    payload: T,
    /// Checks left after the one this task is due for.
    attempts_remaining: u32,
    interval: TimeDelta,
    due: DateTime<Utc>,
}

/// Pending deferred actions, ordered by nothing in particular.
///
/// The owner supplies one `attempt` closure per call. It receives the
/// payload by value and either runs the action, returning `Ok(())`, or
/// hands the payload back with `Err` when it is not ready yet.
#[derive(Debug, Clone)]
pub struct RetryQueue<T> {
    tasks: Vec<RetryTask<T>>,
}

impl<T> Default for RetryQueue<T> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<T: fmt::Debug> RetryQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the action now; defer it if it is not ready.
    pub fn run_or_defer(
        &mut self,
        payload: T,
        policy: RetryPolicy,
        now: DateTime<Utc>,
        attempt: impl FnOnce(T) -> Result<(), T>,
    ) -> RetryOutcome {
        match attempt(payload) {
            Ok(()) => RetryOutcome::Ran,
            Err(payload) => self.submit(payload, policy, now),
        }
    }

    /// Schedule a later check for an action whose first check already
    /// failed.
    pub fn submit(
        &mut self,
        payload: T,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> RetryOutcome {
        let attempts_remaining = policy.max_attempts.saturating_sub(1);
        if attempts_remaining == 0 {
            tracing::debug!(?payload, "Retry budget exhausted on first check, giving up");
            return RetryOutcome::GaveUp;
        }
        self.tasks.push(RetryTask {
            payload,
            // This count excludes the check being scheduled now.
            attempts_remaining: attempts_remaining.saturating_sub(1),
            interval: policy.interval,
            due: now.checked_add_signed(policy.interval).unwrap_or(now),
        });
        RetryOutcome::Deferred
    }

    /// Attempt every task due at or before `now`. Tasks handed back are
    /// rescheduled while checks remain and dropped otherwise.
    ///
    /// Returns the number of actions run.
    pub fn poll(
        &mut self,
        now: DateTime<Utc>,
        mut attempt: impl FnMut(T) -> Result<(), T>,
    ) -> usize {
        let (due, pending): (Vec<_>, Vec<_>) =
            self.tasks.drain(..).partition(|task| task.due <= now);
        self.tasks = pending;

        let mut ran: usize = 0;
        for mut task in due {
            match attempt(task.payload) {
                Ok(()) => ran = ran.saturating_add(1),
                Err(payload) if task.attempts_remaining == 0 => {
                    tracing::debug!(?payload, "Retry attempts exhausted, giving up");
                }
                Err(payload) => {
                    task.payload = payload;
                    task.attempts_remaining = task.attempts_remaining.saturating_sub(1);
                    task.due = now.checked_add_signed(task.interval).unwrap_or(now);
                    self.tasks.push(task);
                }
            }
        }
        ran
    }

    /// Move every task from `other` into this queue.
    pub fn merge(&mut self, other: Self) {
        self.tasks.extend(other.tasks);
    }

    /// Earliest due instant, if anything is pending.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks.iter().map(|task| task.due).min()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every pending task matching `pred`.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&T) -> bool) {
        self.tasks.retain(|task| !pred(&task.payload));
    }
}

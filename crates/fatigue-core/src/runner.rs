//! Async host loop around the engine.
//!
//! [`EngineDriver::run`] owns the engine for the lifetime of the host and
//! multiplexes three sources on one task:
//!
//! - **Shutdown**: any future; when it resolves the loop stops.
//! - **Deadlines**: a sleep until [`FatigueEngine::next_deadline`], after
//!   which [`FatigueEngine::run_due`] fires timers, retries, the sweep and
//!   the autosave. Overdue work runs before the next event is taken, so a
//!   busy channel cannot starve boundary timers.
//! - **Lifecycle events**: an mpsc channel fed by the session layer. The
//!   loop also stops when every sender is dropped.
//!
//! State is saved once more on the way out.

use std::future::Future;
use std::time::Duration;

use fatigue_types::LifecycleEvent;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::clock::ClockSource;
use crate::engine::{EngineError, FatigueEngine};
use crate::presence::Presence;

/// Counters for one [`EngineDriver::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverSummary {
    /// Lifecycle events applied.
    pub events_handled: u64,
    /// Times the loop woke for a deadline.
    pub wakeups: u64,
    /// Entries written by the final save.
    pub saved: usize,
}

/// Drives a [`FatigueEngine`] from a lifecycle event channel.
pub struct EngineDriver<C, P> {
    engine: FatigueEngine<C, P>,
    events: mpsc::Receiver<LifecycleEvent>,
}

impl<C: ClockSource, P: Presence> EngineDriver<C, P> {
    /// Wrap an engine and the receiving end of its event channel.
    pub const fn new(engine: FatigueEngine<C, P>, events: mpsc::Receiver<LifecycleEvent>) -> Self {
        Self { engine, events }
    }

    /// The driven engine.
    pub const fn engine(&self) -> &FatigueEngine<C, P> {
        &self.engine
    }

    /// Give the engine back.
    pub fn into_engine(self) -> FatigueEngine<C, P> {
        self.engine
    }

    /// Run until `shutdown` resolves or the event channel closes, then
    /// save.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the final save fails. Autosave failures
    /// along the way are only logged.
    pub async fn run(
        &mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<DriverSummary, EngineError> {
        let mut summary = DriverSummary::default();
        tokio::pin!(shutdown);

        info!(tracked = self.engine.tracked(), "Engine driver starting");

        loop {
            // Overdue work runs before the next event is taken.
            if self.until_next_deadline().is_zero() {
                Self::run_due(&mut self.engine, &mut summary);
            }
            let wait = self.until_next_deadline();
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                () = tokio::time::sleep(wait) => Self::run_due(&mut self.engine, &mut summary),

                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("Lifecycle event channel closed");
                        break;
                    };
                    debug!(?event, "Lifecycle event");
                    self.engine.handle(event);
                    summary.events_handled = summary.events_handled.saturating_add(1);
                }
            }
        }

        summary.saved = self.engine.save_state()?;
        info!(
            events = summary.events_handled,
            wakeups = summary.wakeups,
            saved = summary.saved,
            "Engine driver stopped"
        );
        Ok(summary)
    }

    fn run_due(engine: &mut FatigueEngine<C, P>, summary: &mut DriverSummary) {
        let work = engine.run_due();
        summary.wakeups = summary.wakeups.saturating_add(1);
        debug!(
            timers = work.timers_fired,
            retries = work.retries_run,
            swept = work.swept,
            saved = work.saved,
            "Ran due work"
        );
    }

    fn until_next_deadline(&self) -> Duration {
        let now = self.engine.clock().now();
        self.engine
            .next_deadline()
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

//! The fatigue accrual engine.
//!
//! [`FatigueEngine`] exclusively owns every [`FatigueRecord`], every
//! boundary timer and the last level announced per entity. It is driven
//! from one logical thread: lifecycle events, timer fires, deferred
//! retries, the sweep and the autosave all enter through `&mut self`, so
//! the record map needs no locking.
//!
//! # State machine
//!
//! - [`FatigueEngine::mark_active`] re-anchors the record at its current
//!   value and starts accruing.
//! - [`FatigueEngine::mark_inactive`] re-anchors it and starts decaying.
//! - [`FatigueEngine::service`] recomputes the level, announces it if it
//!   changed, and schedules exactly one timer for the next boundary. A
//!   fully decayed inactive record is announced as cleared and removed.
//!
//! Every public operation reads the clock once and threads that instant
//! through everything it does.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use fatigue_store::{PersistenceStore, Snapshot, StoreError};
use fatigue_types::{
    EntityId, FatigueLevel, FatigueRecord, FatigueState, LevelNotification, LifecycleEvent,
    MAX_SECONDS, clamp_seconds, elapsed_seconds,
};
use tracing::{debug, info, warn};

use crate::clock::ClockSource;
use crate::config::FatigueConfig;
use crate::level::next_boundary;
use crate::notify::{ConsumerRegistry, NotificationSink};
use crate::presence::{Presence, PresenceStatus};
use crate::retry::{RetryPolicy, RetryQueue};
use crate::timer::TimerService;

/// Errors surfaced by engine persistence.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The persistence store failed as a whole.
    #[error("persistence store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Outcome of [`FatigueEngine::load_state`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries restored as inactive records.
    pub restored: usize,
    /// Entries that had fully decayed during the downtime.
    pub expired: usize,
    /// Entries that could not be parsed.
    pub rejected: usize,
}

/// What one call to [`FatigueEngine::run_due`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueWork {
    /// Boundary timers fired.
    pub timers_fired: usize,
    /// Deferred actions that became ready and ran.
    pub retries_run: usize,
    /// Whether the sweep ran.
    pub swept: bool,
    /// Whether an autosave ran.
    pub saved: bool,
}

/// An action waiting on something outside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// Hand a notification to a consumer slot once it is attached.
    Deliver {
        /// Slot name.
        consumer: String,
        /// The notification to hand over.
        notification: LevelNotification,
    },
    /// Mark an entity inactive once the presence view reports it dead.
    MarkInactiveWhenDead(EntityId),
    /// Service an entity once it has finished loading.
    ServiceWhenLoaded(EntityId),
}

/// Runtime settings derived from [`FatigueConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How often offline entities are re-serviced.
    pub sweep_interval: TimeDelta,
    /// How often state is saved, if at all.
    pub autosave_interval: Option<TimeDelta>,
    /// Retry policy for deliveries to unattached consumers.
    pub delivery: RetryPolicy,
    /// Retry policy for waiting on death to settle.
    pub death_settle: RetryPolicy,
    /// Retry policy for waiting on a connection to finish loading.
    pub connect_load: RetryPolicy,
    /// Consumer slot names.
    pub consumers: Vec<String>,
}

impl EngineSettings {
    /// Build settings from loaded configuration.
    pub fn from_config(config: &FatigueConfig) -> Self {
        Self {
            sweep_interval: config.engine.sweep_interval(),
            autosave_interval: config.engine.autosave_interval(),
            delivery: config.retry.delivery.policy(),
            death_settle: config.retry.death_settle.policy(),
            connect_load: config.retry.connect_load.policy(),
            consumers: config.engine.consumers.clone(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&FatigueConfig::default())
    }
}

/// Per-entity fatigue accrual engine.
pub struct FatigueEngine<C, P> {
    clock: C,
    presence: P,
    store: Box<dyn PersistenceStore>,
    settings: EngineSettings,
    records: BTreeMap<EntityId, FatigueRecord>,
    last_broadcast: BTreeMap<EntityId, LevelNotification>,
    timers: TimerService,
    retries: RetryQueue<Deferred>,
    consumers: ConsumerRegistry,
    next_sweep_at: DateTime<Utc>,
    next_autosave_at: Option<DateTime<Utc>>,
}

impl<C: ClockSource, P: Presence> FatigueEngine<C, P> {
    /// Create an engine with no records. Call [`Self::load_state`] to
    /// restore persisted state.
    pub fn new(
        clock: C,
        presence: P,
        store: Box<dyn PersistenceStore>,
        settings: EngineSettings,
    ) -> Self {
        let now = clock.now();
        let consumers = ConsumerRegistry::new(settings.consumers.iter().cloned());
        let next_sweep_at = after(now, settings.sweep_interval);
        let next_autosave_at = settings.autosave_interval.map(|every| after(now, every));
        Self {
            clock,
            presence,
            store,
            settings,
            records: BTreeMap::new(),
            last_broadcast: BTreeMap::new(),
            timers: TimerService::new(),
            retries: RetryQueue::new(),
            consumers,
            next_sweep_at,
            next_autosave_at,
        }
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// The clock this engine reads.
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// The presence view.
    pub const fn presence(&self) -> &P {
        &self.presence
    }

    /// Mutable access to the presence view.
    pub const fn presence_mut(&mut self) -> &mut P {
        &mut self.presence
    }

    /// Mutable access to the consumer slots.
    pub const fn consumers_mut(&mut self) -> &mut ConsumerRegistry {
        &mut self.consumers
    }

    /// The record for `id`, if tracked.
    pub fn record(&self, id: &EntityId) -> Option<&FatigueRecord> {
        self.records.get(id)
    }

    /// Number of tracked entities.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// Current accumulated seconds for `id`.
    pub fn current_seconds(&self, id: &EntityId) -> Option<f64> {
        let now = self.clock.now();
        self.records.get(id).map(|r| r.current_seconds(now))
    }

    /// Current level for `id`.
    pub fn level(&self, id: &EntityId) -> Option<FatigueLevel> {
        let now = self.clock.now();
        self.records.get(id).map(|r| r.level_at(now))
    }

    /// The last notification announced for `id`.
    pub fn last_broadcast(&self, id: &EntityId) -> Option<&LevelNotification> {
        self.last_broadcast.get(id)
    }

    /// Outstanding boundary timers.
    pub const fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Deferred actions still waiting.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    // -----------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------

    /// The entity became present and eligible: start accruing.
    pub fn mark_active(&mut self, id: &EntityId) {
        let now = self.clock.now();
        self.mark_active_at(id, now);
    }

    /// The entity went away, fell asleep or died: start decaying.
    pub fn mark_inactive(&mut self, id: &EntityId) {
        let now = self.clock.now();
        self.mark_inactive_at(id, now);
    }

    /// Recompute the level for `id`, announce a change and schedule the
    /// next boundary timer.
    pub fn service(&mut self, id: &EntityId) {
        let now = self.clock.now();
        self.service_at(id, now);
    }

    fn mark_active_at(&mut self, id: &EntityId, now: DateTime<Utc>) {
        let current = match self.records.get(id) {
            Some(record) if record.is_active() => {
                warn!(entity = %id, "Entity already active, ignoring duplicate event");
                return;
            }
            Some(record) => record.current_seconds(now),
            None => 0.0,
        };
        self.timers.cancel(id);
        self.records.insert(
            id.clone(),
            FatigueRecord::new(FatigueState::Active, now, current),
        );
        self.last_broadcast.remove(id);
        debug!(entity = %id, seconds = current, "Marked active");
        self.service_at(id, now);
    }

    fn mark_inactive_at(&mut self, id: &EntityId, now: DateTime<Utc>) {
        let Some(record) = self.records.get(id) else {
            self.records.insert(
                id.clone(),
                FatigueRecord::new(FatigueState::Inactive, now, 0.0),
            );
            debug!(entity = %id, "Tracking new inactive entity");
            return;
        };
        if !record.is_active() {
            debug!(entity = %id, "Entity already inactive");
            return;
        }
        let current = record.current_seconds(now);
        self.timers.cancel(id);
        self.records.insert(
            id.clone(),
            FatigueRecord::new(FatigueState::Inactive, now, current),
        );
        // Forces the decay-direction next-change instant out even when the
        // level itself is unchanged.
        self.last_broadcast.remove(id);
        debug!(entity = %id, seconds = current, "Marked inactive");
        self.service_at(id, now);
    }

    fn service_at(&mut self, id: &EntityId, now: DateTime<Utc>) {
        let Some(record) = self.records.get(id).copied() else {
            debug!(entity = %id, "Service requested for untracked entity");
            return;
        };
        self.timers.cancel(id);
        let current = record.current_seconds(now);

        if record.state == FatigueState::Inactive && current <= 0.0 {
            let cleared = LevelNotification::cleared(id.clone());
            if self.last_broadcast.get(id) != Some(&cleared) {
                self.broadcast(&cleared, now);
            }
            self.records.remove(id);
            self.last_broadcast.remove(id);
            info!(entity = %id, "Fatigue fully decayed, record removed");
            return;
        }

        let level = FatigueLevel::from_seconds(current);
        let next_change_at = next_boundary(record.state, current).map(|b| b.due_from(now));

        if self.last_broadcast.get(id).map(|n| n.level) != Some(level) {
            let notification = LevelNotification {
                entity: id.clone(),
                level,
                next_change_at,
            };
            self.broadcast(&notification, now);
            self.last_broadcast.insert(id.clone(), notification);
        }

        if let Some(due) = next_change_at {
            self.timers.schedule(id.clone(), due);
        }
    }

    fn broadcast(&mut self, notification: &LevelNotification, now: DateTime<Utc>) {
        debug!(
            entity = %notification.entity,
            level = notification.level.value(),
            next_change_at = ?notification.next_change_at,
            "Announcing level"
        );
        for consumer in self.consumers.names() {
            if let Some(sink) = self.consumers.try_get(&consumer) {
                sink.deliver(notification);
            } else {
                self.retries.submit(
                    Deferred::Deliver {
                        consumer,
                        notification: notification.clone(),
                    },
                    self.settings.delivery,
                    now,
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // Lifecycle events
    // -----------------------------------------------------------------

    /// Apply one lifecycle event.
    pub fn handle(&mut self, event: LifecycleEvent) {
        self.presence.observe(&event);
        let now = self.clock.now();
        match event {
            LifecycleEvent::BecameActive { id } => self.mark_active_at(&id, now),
            LifecycleEvent::BecameInactive { id } | LifecycleEvent::Disconnected { id } => {
                self.mark_inactive_at(&id, now);
            }
            LifecycleEvent::Observed { id, active } => {
                if active {
                    self.mark_active_at(&id, now);
                } else {
                    self.mark_inactive_at(&id, now);
                }
            }
            LifecycleEvent::Died { id } => {
                let policy = self.settings.death_settle;
                self.run_or_defer(Deferred::MarkInactiveWhenDead(id), policy, now);
            }
            LifecycleEvent::Connected { id } => {
                let policy = self.settings.connect_load;
                self.run_or_defer(Deferred::ServiceWhenLoaded(id), policy, now);
            }
            LifecycleEvent::Loaded { .. } => {}
            LifecycleEvent::ConsumerAttached { name } => self.resync_consumer(&name, now),
        }
    }

    /// Seed from the entities already connected at startup.
    pub fn observe_all<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = (EntityId, bool)>,
    {
        for (id, active) in entities {
            self.handle(LifecycleEvent::Observed { id, active });
        }
    }

    /// Fill a consumer slot and bring it up to date.
    pub fn attach_consumer(&mut self, name: impl Into<String>, sink: Box<dyn NotificationSink>) {
        let name = name.into();
        self.consumers.attach(name.clone(), sink);
        self.handle(LifecycleEvent::ConsumerAttached { name });
    }

    fn resync_consumer(&mut self, name: &str, now: DateTime<Utc>) {
        // Anything queued for this consumer is stale once it is resynced.
        self.retries.cancel_where(
            |task| matches!(task, Deferred::Deliver { consumer, .. } if consumer == name),
        );
        self.last_broadcast.clear();
        let ids: Vec<EntityId> = self.records.keys().cloned().collect();
        info!(consumer = name, entities = ids.len(), "Resyncing consumers");
        for id in &ids {
            self.service_at(id, now);
        }
    }

    fn is_ready(&self, task: &Deferred) -> bool {
        match task {
            Deferred::Deliver { consumer, .. } => self.consumers.is_attached(consumer),
            Deferred::MarkInactiveWhenDead(id) => {
                self.presence.status(id) == PresenceStatus::Dead
            }
            Deferred::ServiceWhenLoaded(id) => self.presence.status(id) != PresenceStatus::Loading,
        }
    }

    fn run_deferred(&mut self, task: Deferred, now: DateTime<Utc>) {
        match task {
            Deferred::Deliver {
                consumer,
                notification,
            } => {
                if let Some(sink) = self.consumers.try_get(&consumer) {
                    sink.deliver(&notification);
                }
            }
            Deferred::MarkInactiveWhenDead(id) => self.mark_inactive_at(&id, now),
            Deferred::ServiceWhenLoaded(id) => self.service_at(&id, now),
        }
    }

    /// Run `task` if it is ready, otherwise hand it back.
    fn attempt(&mut self, task: Deferred, now: DateTime<Utc>) -> Result<(), Deferred> {
        if !self.is_ready(&task) {
            return Err(task);
        }
        self.run_deferred(task, now);
        Ok(())
    }

    fn run_or_defer(&mut self, task: Deferred, policy: RetryPolicy, now: DateTime<Utc>) {
        let outcome = self.with_retries(|retries, engine| {
            retries.run_or_defer(task, policy, now, |task| engine.attempt(task, now))
        });
        debug!(?outcome, "Checked deferred action");
    }

    /// Lend the retry queue out while `f` may also mutate the engine.
    /// Deliveries queued by actions run inside `f` are kept.
    fn with_retries<R>(
        &mut self,
        f: impl FnOnce(&mut RetryQueue<Deferred>, &mut Self) -> R,
    ) -> R {
        let mut retries = std::mem::take(&mut self.retries);
        let result = f(&mut retries, self);
        retries.merge(std::mem::take(&mut self.retries));
        self.retries = retries;
        result
    }

    // -----------------------------------------------------------------
    // Run loop surface
    // -----------------------------------------------------------------

    /// Fire every due boundary timer, poll due retries, and run the sweep
    /// and autosave when their intervals have elapsed.
    pub fn run_due(&mut self) -> DueWork {
        let now = self.clock.now();
        let mut work = DueWork::default();

        for id in self.timers.pop_due(now) {
            self.service_at(&id, now);
            work.timers_fired = work.timers_fired.saturating_add(1);
        }

        work.retries_run =
            self.with_retries(|retries, engine| retries.poll(now, |task| engine.attempt(task, now)));

        if now >= self.next_sweep_at {
            self.sweep_at(now);
            self.next_sweep_at = after(now, self.settings.sweep_interval);
            work.swept = true;
        }

        if let Some(due) = self.next_autosave_at
            && now >= due
        {
            if let Err(e) = self.save_state_at(now) {
                warn!(error = %e, "Autosave failed");
            }
            self.next_autosave_at = self.settings.autosave_interval.map(|every| after(now, every));
            work.saved = true;
        }

        work
    }

    /// Earliest instant at which [`Self::run_due`] has something to do.
    pub fn next_deadline(&self) -> DateTime<Utc> {
        [
            self.timers.next_deadline(),
            self.retries.next_due(),
            self.next_autosave_at,
        ]
        .into_iter()
        .flatten()
        .fold(self.next_sweep_at, std::cmp::min)
    }

    /// Re-service every entity the presence view reports offline.
    pub fn sweep(&mut self) {
        let now = self.clock.now();
        self.sweep_at(now);
    }

    fn sweep_at(&mut self, now: DateTime<Utc>) {
        let offline: Vec<(EntityId, bool)> = self
            .records
            .iter()
            .filter(|(id, _)| !self.presence.status(id).is_online())
            .map(|(id, record)| (id.clone(), record.is_active()))
            .collect();
        debug!(offline = offline.len(), "Sweeping offline entities");
        for (id, active) in &offline {
            if *active {
                warn!(entity = %id, "Offline entity still active, disconnect was missed");
                self.mark_inactive_at(id, now);
            } else {
                self.service_at(id, now);
            }
        }
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Write a full snapshot of every record at the current instant.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the store rejects the write.
    pub fn save_state(&mut self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        self.save_state_at(now)
    }

    fn save_state_at(&mut self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let entries: Vec<(EntityId, f64)> = self
            .records
            .iter()
            .map(|(id, record)| (id.clone(), clamp_seconds(record.current_seconds(now))))
            .collect();
        let count = entries.len();
        self.store.save(&Snapshot {
            taken_at: now,
            entries,
        })?;
        info!(entries = count, "Saved fatigue state");
        Ok(count)
    }

    /// Restore persisted state, decaying each entry for the time that
    /// passed since it was written.
    ///
    /// Every restored entity starts inactive. Unreadable entries are
    /// logged and skipped without affecting their siblings.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] only if the store as a whole cannot
    /// be read.
    pub fn load_state(&mut self) -> Result<LoadReport, EngineError> {
        let now = self.clock.now();
        let entries = self.store.load()?;
        let mut report = LoadReport::default();
        let mut restored = Vec::new();

        for entry in &entries {
            let resolved = match entry.resolve() {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable fatigue entry");
                    report.rejected = report.rejected.saturating_add(1);
                    continue;
                }
            };
            let elapsed = elapsed_seconds(resolved.timestamp, now);
            let reconstructed = (resolved.seconds_active - elapsed).min(MAX_SECONDS);
            if reconstructed > 0.0 {
                self.records.insert(
                    resolved.id.clone(),
                    FatigueRecord::new(FatigueState::Inactive, now, reconstructed),
                );
                restored.push(resolved.id);
                report.restored = report.restored.saturating_add(1);
            } else {
                debug!(entity = %resolved.id, "Entry fully decayed during downtime");
                report.expired = report.expired.saturating_add(1);
            }
        }

        for id in &restored {
            self.service_at(id, now);
        }

        info!(
            restored = report.restored,
            expired = report.expired,
            rejected = report.rejected,
            "Loaded fatigue state"
        );
        Ok(report)
    }
}

fn after(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use fatigue_store::{MemoryStore, StoredEntry, StoredTimestamp};

    use super::*;
    use crate::clock::ManualClock;
    use crate::presence::SessionTable;

    type Log = Rc<RefCell<Vec<LevelNotification>>>;

    /// Records each notification whole.
    struct Recorder(Log);

    impl NotificationSink for Recorder {
        fn on_fatigue_level(&mut self, _: &EntityId, _: FatigueLevel) {}
        fn on_next_level_time(&mut self, _: &EntityId, _: DateTime<Utc>) {}
        fn on_level_time_cleared(&mut self, _: &EntityId) {}

        fn deliver(&mut self, notification: &LevelNotification) {
            self.0.borrow_mut().push(notification.clone());
        }
    }

    /// Presence the test sets by hand; lifecycle events do not move it.
    #[derive(Default)]
    struct Scripted(BTreeMap<EntityId, PresenceStatus>);

    impl Presence for Scripted {
        fn status(&self, id: &EntityId) -> PresenceStatus {
            self.0.get(id).copied().unwrap_or(PresenceStatus::Offline)
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn id(raw: &str) -> EntityId {
        EntityId::new(raw).unwrap()
    }

    fn settings(consumers: &[&str]) -> EngineSettings {
        EngineSettings {
            consumers: consumers.iter().map(|c| (*c).to_owned()).collect(),
            ..EngineSettings::default()
        }
    }

    fn engine_with<P: Presence>(
        presence: P,
        store: MemoryStore,
    ) -> (FatigueEngine<ManualClock, P>, ManualClock, Log) {
        let clock = ManualClock::new(t0());
        let log: Log = Rc::default();
        let mut engine =
            FatigueEngine::new(clock.clone(), presence, Box::new(store), settings(&["test"]));
        engine.attach_consumer("test", Box::new(Recorder(Rc::clone(&log))));
        (engine, clock, log)
    }

    fn engine() -> (FatigueEngine<ManualClock, SessionTable>, ManualClock, Log) {
        engine_with(SessionTable::new(), MemoryStore::new())
    }

    #[test]
    fn mark_active_creates_record_and_schedules_first_boundary() {
        let (mut engine, _clock, log) = engine();
        engine.mark_active(&id("p1"));

        let record = engine.record(&id("p1")).unwrap();
        assert_eq!(record.state, FatigueState::Active);
        assert_eq!(record.anchor_seconds, 0.0);
        assert_eq!(
            engine.timers().deadline(&id("p1")),
            Some(t0() + TimeDelta::hours(1))
        );
        let sent = log.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, FatigueLevel::ZERO);
        assert_eq!(sent[0].next_change_at, Some(t0() + TimeDelta::hours(1)));
    }

    #[test]
    fn duplicate_mark_active_is_ignored() {
        let (mut engine, clock, log) = engine();
        engine.mark_active(&id("p1"));
        let before = *engine.record(&id("p1")).unwrap();
        clock.advance_secs(30);
        engine.mark_active(&id("p1"));

        assert_eq!(*engine.record(&id("p1")).unwrap(), before);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(engine.timers().outstanding(), 1);
    }

    #[test]
    fn observe_all_seeds_presence_and_records() {
        let (mut engine, _clock, log) = engine();
        engine.observe_all([(id("awake"), true), (id("asleep"), false)]);

        assert_eq!(
            engine.record(&id("awake")).unwrap().state,
            FatigueState::Active
        );
        assert_eq!(
            engine.record(&id("asleep")).unwrap().state,
            FatigueState::Inactive
        );
        assert_eq!(
            engine.presence().status(&id("awake")),
            PresenceStatus::Awake
        );
        assert_eq!(
            engine.presence().status(&id("asleep")),
            PresenceStatus::Sleeping
        );
        // Only the accruing entity has anything to announce.
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(engine.timers().outstanding(), 1);
    }

    #[test]
    fn mark_inactive_on_unknown_entity_creates_empty_record_silently() {
        let (mut engine, _clock, log) = engine();
        engine.mark_inactive(&id("p1"));

        let record = engine.record(&id("p1")).unwrap();
        assert_eq!(record.state, FatigueState::Inactive);
        assert_eq!(record.anchor_seconds, 0.0);
        assert!(log.borrow().is_empty());
        assert!(!engine.timers().is_scheduled(&id("p1")));
    }

    #[test]
    fn mark_inactive_reanchors_and_announces_decay_time() {
        let (mut engine, clock, log) = engine();
        engine.handle(LifecycleEvent::BecameActive { id: id("p1") });
        clock.advance_secs(3700);
        engine.run_due();
        engine.mark_inactive(&id("p1"));

        let record = engine.record(&id("p1")).unwrap();
        assert_eq!(record.state, FatigueState::Inactive);
        assert_eq!(record.anchor_seconds, 3700.0);

        // Same level, but the decay-direction instant must still go out.
        let last = log.borrow().last().cloned().unwrap();
        assert_eq!(last.level.value(), 1);
        let expected = clock.now() + TimeDelta::milliseconds(100_001);
        assert_eq!(last.next_change_at, Some(expected));
        assert_eq!(engine.timers().deadline(&id("p1")), Some(expected));
    }

    #[test]
    fn decay_to_zero_emits_cleared_and_removes_record() {
        let (mut engine, clock, log) = engine();
        engine.mark_active(&id("p1"));
        clock.advance_secs(10);
        engine.mark_inactive(&id("p1"));
        clock.advance_secs(11);
        engine.run_due();

        assert!(engine.record(&id("p1")).is_none());
        assert!(engine.last_broadcast(&id("p1")).is_none());
        assert!(!engine.timers().is_scheduled(&id("p1")));
        assert_eq!(
            log.borrow().last().cloned(),
            Some(LevelNotification::cleared(id("p1")))
        );
    }

    #[test]
    fn service_on_untracked_entity_is_a_no_op() {
        let (mut engine, _clock, log) = engine();
        engine.service(&id("ghost"));
        assert_eq!(engine.tracked(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn unattached_consumer_receives_notification_once_attached() {
        let clock = ManualClock::new(t0());
        let log: Log = Rc::default();
        let mut engine = FatigueEngine::new(
            clock.clone(),
            SessionTable::new(),
            Box::new(MemoryStore::new()),
            settings(&["late"]),
        );
        engine.mark_active(&id("p1"));
        assert_eq!(engine.pending_retries(), 1);

        // Filled without the attach event: the queued delivery is what
        // reaches it.
        engine
            .consumers_mut()
            .attach("late", Box::new(Recorder(Rc::clone(&log))));
        clock.advance_secs(1);
        let work = engine.run_due();
        assert_eq!(work.retries_run, 1);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(engine.pending_retries(), 0);
    }

    #[test]
    fn delivery_to_absent_consumer_is_dropped_after_budget() {
        let clock = ManualClock::new(t0());
        let mut engine = FatigueEngine::new(
            clock.clone(),
            SessionTable::new(),
            Box::new(MemoryStore::new()),
            settings(&["never"]),
        );
        engine.mark_active(&id("p1"));
        for _ in 0..10 {
            clock.advance_secs(1);
            engine.run_due();
        }
        assert_eq!(engine.pending_retries(), 0);
    }

    #[test]
    fn consumer_attach_resends_current_levels() {
        let (mut engine, clock, log) = engine();
        engine.handle(LifecycleEvent::BecameActive { id: id("p1") });
        clock.advance_secs(7300);
        engine.run_due();
        engine.run_due();
        let sent_before = log.borrow().len();

        let late: Log = Rc::default();
        engine.attach_consumer("display", Box::new(Recorder(Rc::clone(&late))));

        assert_eq!(late.borrow().len(), 1);
        assert_eq!(late.borrow()[0].level.value(), 2);
        // Already-attached consumers get the resync too.
        assert_eq!(log.borrow().len(), sent_before.saturating_add(1));
    }

    #[test]
    fn died_waits_for_presence_to_report_dead() {
        let mut presence = Scripted::default();
        presence.0.insert(id("p1"), PresenceStatus::Awake);
        let (mut engine, clock, _log) = engine_with(presence, MemoryStore::new());
        engine.mark_active(&id("p1"));
        clock.advance_secs(60);

        engine.handle(LifecycleEvent::Died { id: id("p1") });
        assert!(engine.record(&id("p1")).unwrap().is_active());
        assert_eq!(engine.pending_retries(), 1);

        engine
            .presence_mut()
            .0
            .insert(id("p1"), PresenceStatus::Dead);
        clock.advance(TimeDelta::milliseconds(200));
        engine.run_due();

        let record = engine.record(&id("p1")).unwrap();
        assert_eq!(record.state, FatigueState::Inactive);
        assert_eq!(engine.pending_retries(), 0);
    }

    #[test]
    fn deliveries_queued_by_a_deferred_action_are_kept() {
        let clock = ManualClock::new(t0());
        let mut presence = Scripted::default();
        presence.0.insert(id("p1"), PresenceStatus::Awake);
        let mut engine = FatigueEngine::new(
            clock.clone(),
            presence,
            Box::new(MemoryStore::new()),
            settings(&["test", "late"]),
        );
        engine.attach_consumer("test", Box::new(Recorder(Rc::default())));
        engine.mark_active(&id("p1"));
        clock.advance_secs(60);
        engine.handle(LifecycleEvent::Died { id: id("p1") });
        assert_eq!(engine.pending_retries(), 2);

        engine
            .presence_mut()
            .0
            .insert(id("p1"), PresenceStatus::Dead);
        clock.advance(TimeDelta::milliseconds(200));
        let work = engine.run_due();

        // The death ran; its announcement to "late" joined the older one.
        assert_eq!(work.retries_run, 1);
        assert_eq!(
            engine.record(&id("p1")).unwrap().state,
            FatigueState::Inactive
        );
        assert_eq!(engine.pending_retries(), 2);

        let late: Log = Rc::default();
        engine.attach_consumer("late", Box::new(Recorder(Rc::clone(&late))));
        assert_eq!(engine.pending_retries(), 0);
        assert_eq!(late.borrow().len(), 1);
    }

    #[test]
    fn died_is_dropped_if_death_never_settles() {
        let mut presence = Scripted::default();
        presence.0.insert(id("p1"), PresenceStatus::Awake);
        let (mut engine, clock, _log) = engine_with(presence, MemoryStore::new());
        engine.mark_active(&id("p1"));

        engine.handle(LifecycleEvent::Died { id: id("p1") });
        for _ in 0..20 {
            clock.advance(TimeDelta::milliseconds(200));
            engine.run_due();
        }
        assert_eq!(engine.pending_retries(), 0);
        assert!(engine.record(&id("p1")).unwrap().is_active());
    }

    #[test]
    fn connected_services_after_loading_finishes() {
        let store = MemoryStore::with_entries(vec![StoredEntry::native("p1", 5000.0, t0())]);
        let (mut engine, clock, _log) = engine_with(SessionTable::new(), store);
        engine.load_state().unwrap();

        engine.handle(LifecycleEvent::Connected { id: id("p1") });
        assert_eq!(engine.pending_retries(), 1);

        // Still loading at the first retry.
        clock.advance(TimeDelta::milliseconds(500));
        assert_eq!(engine.run_due().retries_run, 0);
        assert_eq!(engine.pending_retries(), 1);

        engine.handle(LifecycleEvent::Loaded { id: id("p1") });
        clock.advance(TimeDelta::milliseconds(500));
        assert_eq!(engine.run_due().retries_run, 1);
        assert_eq!(engine.pending_retries(), 0);
        assert!(engine.timers().is_scheduled(&id("p1")));
    }

    #[test]
    fn connected_runs_immediately_when_not_loading() {
        let mut engine = FatigueEngine::new(
            ManualClock::new(t0()),
            Scripted::default(),
            Box::new(MemoryStore::new()),
            settings(&[]),
        );
        engine.handle(LifecycleEvent::Connected { id: id("p2") });
        assert_eq!(engine.pending_retries(), 0);
    }

    #[test]
    fn sweep_marks_missed_disconnects_inactive() {
        let (mut engine, clock, _log) = engine();
        engine.handle(LifecycleEvent::BecameActive { id: id("p1") });
        engine.handle(LifecycleEvent::BecameActive { id: id("p2") });
        // p2 leaves without a disconnect reaching the engine.
        engine.presence_mut().set(id("p2"), PresenceStatus::Offline);

        clock.advance_secs(300);
        let work = engine.run_due();
        assert!(work.swept);
        assert!(engine.record(&id("p1")).unwrap().is_active());
        assert_eq!(engine.record(&id("p2")).unwrap().state, FatigueState::Inactive);
    }

    #[test]
    fn sweep_removes_empty_offline_records() {
        let (mut engine, clock, _log) = engine();
        engine.mark_inactive(&id("p1"));
        clock.advance_secs(300);
        engine.run_due();
        assert_eq!(engine.tracked(), 0);
    }

    #[test]
    fn autosave_writes_snapshot_on_interval() {
        let store = MemoryStore::new();
        let (mut engine, clock, _log) = engine_with(SessionTable::new(), store.clone());
        engine.handle(LifecycleEvent::BecameActive { id: id("p1") });

        clock.advance_secs(600);
        let work = engine.run_due();
        assert!(work.saved);
        let saved = store.entries();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].seconds_active, Some(600.0));
        assert_eq!(saved[0].timestamp, StoredTimestamp::Native(clock.now()));
    }

    #[test]
    fn next_deadline_is_the_earliest_pending_work() {
        let (mut engine, _clock, _log) = engine();
        assert_eq!(engine.next_deadline(), t0() + TimeDelta::seconds(300));
        engine.mark_active(&id("p1"));
        engine.mark_inactive(&id("p1"));
        engine.mark_active(&id("p1"));
        assert_eq!(engine.timers().outstanding(), 1);
        // Active from zero at t0: the boundary is an hour out, the sweep
        // comes first.
        assert_eq!(engine.next_deadline(), t0() + TimeDelta::seconds(300));
    }

    #[test]
    fn load_counts_restored_expired_and_rejected() {
        let store = MemoryStore::with_entries(vec![
            StoredEntry::native("fresh", 3700.0, t0()),
            StoredEntry::native("stale", 100.0, t0() - TimeDelta::seconds(200)),
            StoredEntry {
                id: "odd".to_owned(),
                seconds_active: Some(50.0),
                timestamp: StoredTimestamp::Unsupported("number"),
            },
            StoredEntry {
                id: "   ".to_owned(),
                seconds_active: Some(50.0),
                timestamp: StoredTimestamp::Native(t0()),
            },
        ]);
        let (mut engine, _clock, log) = engine_with(SessionTable::new(), store);
        let report = engine.load_state().unwrap();

        assert_eq!(
            report,
            LoadReport {
                restored: 1,
                expired: 1,
                rejected: 2,
            }
        );
        let record = engine.record(&id("fresh")).unwrap();
        assert_eq!(record.state, FatigueState::Inactive);
        assert_eq!(record.anchor_seconds, 3700.0);
        assert!(engine.timers().is_scheduled(&id("fresh")));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn load_clamps_after_subtracting_downtime() {
        let store = MemoryStore::with_entries(vec![StoredEntry::native(
            "p1",
            40_000.0,
            t0() - TimeDelta::seconds(1000),
        )]);
        let (mut engine, _clock, _log) = engine_with(SessionTable::new(), store);
        engine.load_state().unwrap();
        assert_eq!(engine.record(&id("p1")).unwrap().anchor_seconds, MAX_SECONDS);
    }
}

//! Nack tracker: owns one bucket index and one timer armed at its earliest key.
//!
//! Lifecycle: `Idle` (nothing pending, timer cancelled) -> `Armed` (timer set
//! at the earliest bucket key) -> `Firing` (draining and dispatching) ->
//! `Armed` or `Idle`. `close` moves to the terminal `Closed` state from
//! anywhere.
//!
//! The index and the armed deadline share one lock. Inserting a reservation
//! and deciding whether it moved the minimum earlier is therefore serialized
//! with the fire path's "drain, read earliest key, arm" sequence, so an
//! earlier reservation can never slip in unnoticed between the two. Dispatch
//! to the sender happens after the lock is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use nack_core::{BucketKey, EntryId, LedgerId, MessageEntryId, NackError, PrecisionBits};
use tracing::{debug, info, warn};

use crate::backoff::RedeliveryBackoff;
use crate::clock::{Clock, SystemClock};
use crate::config::NackTrackerConfig;
use crate::index::TimestampBucketIndex;
use crate::sender::RedeliverySender;
use crate::timer::{DelayTimer, Timer};

/// Externally observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Armed { deadline: BucketKey },
    Firing,
    Closed,
}

/// Outcome of one drain/dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Buckets removed from the index by this cycle.
    pub drained_buckets: usize,
    /// Successful `redeliver` calls (one per ledger per bucket).
    pub dispatched_batches: usize,
    /// Entry ids carried by successful calls.
    pub dispatched_entries: u64,
    /// `redeliver` calls that returned an error.
    pub failed_batches: usize,
    /// Deadline the timer was re-armed at, if anything remains.
    pub next_deadline: Option<BucketKey>,
}

/// Cumulative tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStatsSnapshot {
    pub scheduled: u64,
    pub fires: u64,
    pub dispatched_batches: u64,
    pub dispatched_entries: u64,
    pub dispatch_failures: u64,
}

#[derive(Debug, Default)]
struct TrackerStatsInner {
    scheduled: AtomicU64,
    fires: AtomicU64,
    dispatched_batches: AtomicU64,
    dispatched_entries: AtomicU64,
    dispatch_failures: AtomicU64,
}

#[derive(Debug, Default)]
struct Pending {
    index: TimestampBucketIndex,
    armed_at: Option<BucketKey>,
    closed: bool,
}

struct Shared<S, C, T> {
    precision: PrecisionBits,
    nack_delay: Duration,
    backoff: Option<Box<dyn RedeliveryBackoff>>,
    sender: S,
    clock: C,
    timer: T,
    pending: Mutex<Pending>,
    fire_cycle: Mutex<()>,
    firing: AtomicBool,
    closed: AtomicBool,
    stats: TrackerStatsInner,
}

/// Validated, immutable tracker parameters.
struct Settings {
    precision: PrecisionBits,
    nack_delay: Duration,
    backoff: Option<Box<dyn RedeliveryBackoff>>,
}

impl Settings {
    fn from_config(config: &NackTrackerConfig) -> Result<Self, NackError> {
        config.validate()?;
        Ok(Self {
            precision: config.precision()?,
            nack_delay: config.nack_delay,
            backoff: config
                .backoff
                .map(|b| Box::new(b) as Box<dyn RedeliveryBackoff>),
        })
    }
}

fn delay_until(key: BucketKey, now: i64) -> Duration {
    Duration::from_millis(key.saturating_sub(now).max(0) as u64)
}

fn duration_millis(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

impl<S, C, T> Shared<S, C, T>
where
    S: RedeliverySender,
    C: Clock,
    T: Timer,
{
    fn new(settings: Settings, sender: S, clock: C, timer: T) -> Self {
        Self {
            precision: settings.precision,
            nack_delay: settings.nack_delay,
            backoff: settings.backoff,
            sender,
            clock,
            timer,
            pending: Mutex::new(Pending::default()),
            fire_cycle: Mutex::new(()),
            firing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stats: TrackerStatsInner::default(),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        delay_millis: i64,
    ) -> Result<BucketKey, NackError> {
        let entry = u64::try_from(entry_id).map_err(|_| NackError::InvalidEntryId(entry_id))?;
        let now = self.clock.now_millis();
        let due = if delay_millis <= 0 {
            now
        } else {
            now.saturating_add(delay_millis)
        };
        let key = self.precision.bucket_key(due);

        let mut pending = self.lock_pending();
        if pending.closed {
            return Err(NackError::Closed);
        }
        if pending.index.schedule(ledger_id, entry, key) {
            pending.armed_at = Some(key);
            self.timer.arm(delay_until(key, now));
            debug!(ledger_id, entry_id, key, "nack timer armed at earlier bucket");
        }
        drop(pending);

        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        Ok(key)
    }

    fn fire(&self) -> FireReport {
        let _cycle = self
            .fire_cycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.firing.store(true, Ordering::SeqCst);
        let report = self.drain_and_dispatch();
        self.firing.store(false, Ordering::SeqCst);
        report
    }

    fn drain_and_dispatch(&self) -> FireReport {
        let mut report = FireReport::default();
        let now = self.clock.now_millis();

        let drained = {
            let mut pending = self.lock_pending();
            if pending.closed {
                return report;
            }
            let drained = pending.index.drain_due(now);
            match pending.index.peek_earliest_key() {
                Some(next) => {
                    pending.armed_at = Some(next);
                    self.timer.arm(delay_until(next, now));
                }
                None => {
                    pending.armed_at = None;
                    self.timer.cancel();
                }
            }
            report.next_deadline = pending.armed_at;
            drained
        };
        self.stats.fires.fetch_add(1, Ordering::Relaxed);
        report.drained_buckets = drained.len();
        if !drained.is_empty() {
            debug!(
                now,
                buckets = drained.len(),
                next = ?report.next_deadline,
                "draining due nack buckets"
            );
        }

        'drain: for (key, bucket) in drained {
            for (ledger_id, entry_ids) in bucket {
                if self.closed.load(Ordering::SeqCst) {
                    debug!(key, "tracker closed mid-drain; dropping remaining redeliveries");
                    break 'drain;
                }
                match self.sender.redeliver(ledger_id, &entry_ids) {
                    Ok(()) => {
                        report.dispatched_batches += 1;
                        report.dispatched_entries += entry_ids.len();
                    }
                    Err(err) => {
                        report.failed_batches += 1;
                        warn!(
                            ledger_id,
                            key,
                            entries = entry_ids.len(),
                            "redelivery request failed: {err}"
                        );
                    }
                }
            }
        }

        self.stats
            .dispatched_batches
            .fetch_add(report.dispatched_batches as u64, Ordering::Relaxed);
        self.stats
            .dispatched_entries
            .fetch_add(report.dispatched_entries, Ordering::Relaxed);
        self.stats
            .dispatch_failures
            .fetch_add(report.failed_batches as u64, Ordering::Relaxed);
        report
    }

    fn close(&self) {
        let mut pending = self.lock_pending();
        if pending.closed {
            return;
        }
        pending.closed = true;
        self.closed.store(true, Ordering::SeqCst);
        let discarded = pending.index.reservation_count();
        pending.index.clear();
        pending.armed_at = None;
        self.timer.cancel();
        info!(discarded, "nack tracker closed");
    }
}

/// Schedules redelivery of negatively acknowledged entries.
///
/// Safe to share across threads (`Arc<NackTracker<_>>`); dropping the tracker
/// closes it.
pub struct NackTracker<S, C = SystemClock, T = DelayTimer>
where
    S: RedeliverySender,
    C: Clock,
    T: Timer,
{
    shared: Arc<Shared<S, C, T>>,
}

impl<S> NackTracker<S, SystemClock, DelayTimer>
where
    S: RedeliverySender + 'static,
{
    /// Starts a tracker on wall-clock time with its own timer thread.
    pub fn start(config: &NackTrackerConfig, sender: S) -> Result<Self, NackError> {
        Self::start_with_clock(config, sender, SystemClock)
    }
}

impl<S, C> NackTracker<S, C, DelayTimer>
where
    S: RedeliverySender + 'static,
    C: Clock + 'static,
{
    /// Starts a tracker whose timer thread fires drains automatically.
    pub fn start_with_clock(
        config: &NackTrackerConfig,
        sender: S,
        clock: C,
    ) -> Result<Self, NackError> {
        let settings = Settings::from_config(config)?;
        let thread_name = config.timer_thread_name.clone();
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<S, C, DelayTimer>>| {
            let weak = weak.clone();
            let timer = DelayTimer::spawn(thread_name, move || {
                if let Some(shared) = weak.upgrade() {
                    shared.fire();
                }
            });
            Shared::new(settings, sender, clock, timer)
        });
        Ok(Self { shared })
    }
}

impl<S, C, T> NackTracker<S, C, T>
where
    S: RedeliverySender,
    C: Clock,
    T: Timer,
{
    /// Builds a tracker around a caller-owned timer.
    ///
    /// The caller is responsible for invoking [`NackTracker::fire`] when the
    /// timer elapses.
    pub fn with_timer(
        config: &NackTrackerConfig,
        sender: S,
        clock: C,
        timer: T,
    ) -> Result<Self, NackError> {
        let settings = Settings::from_config(config)?;
        Ok(Self {
            shared: Arc::new(Shared::new(settings, sender, clock, timer)),
        })
    }

    /// Reserves redelivery of `(ledger_id, entry_id)` after `delay_millis`.
    ///
    /// A non-positive delay is due immediately. Returns the bucket key the
    /// reservation landed in. Scheduling the same entry again with a
    /// different delay adds an independent reservation; both dispatch.
    pub fn schedule(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        delay_millis: i64,
    ) -> Result<BucketKey, NackError> {
        self.shared.schedule(ledger_id, entry_id, delay_millis)
    }

    pub fn schedule_message(
        &self,
        message_id: MessageEntryId,
        delay: Duration,
    ) -> Result<BucketKey, NackError> {
        self.shared.schedule(
            message_id.ledger_id,
            message_id.entry_id,
            duration_millis(delay),
        )
    }

    /// Reserves redelivery after the configured default nack delay.
    pub fn schedule_default(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
    ) -> Result<BucketKey, NackError> {
        self.shared
            .schedule(ledger_id, entry_id, duration_millis(self.shared.nack_delay))
    }

    /// Reserves redelivery with a delay derived from how often the message
    /// was already redelivered, when a backoff is configured.
    pub fn schedule_with_redelivery_count(
        &self,
        ledger_id: LedgerId,
        entry_id: EntryId,
        redelivery_count: u32,
    ) -> Result<BucketKey, NackError> {
        let delay = match &self.shared.backoff {
            Some(backoff) => backoff.next_delay(redelivery_count),
            None => self.shared.nack_delay,
        };
        self.shared
            .schedule(ledger_id, entry_id, duration_millis(delay))
    }

    /// Drains every due bucket and dispatches it, then re-arms the timer.
    pub fn fire(&self) -> FireReport {
        self.shared.fire()
    }

    /// Cancels the timer and discards all pending reservations.
    ///
    /// Nothing is dispatched afterwards, including ledgers of a drain already
    /// in progress that were not yet handed to the sender.
    pub fn close(&self) {
        self.shared.close()
    }

    pub fn state(&self) -> TrackerState {
        if self.shared.closed.load(Ordering::SeqCst) {
            return TrackerState::Closed;
        }
        if self.shared.firing.load(Ordering::SeqCst) {
            return TrackerState::Firing;
        }
        match self.shared.lock_pending().armed_at {
            Some(deadline) => TrackerState::Armed { deadline },
            None => TrackerState::Idle,
        }
    }

    pub fn armed_at(&self) -> Option<BucketKey> {
        self.shared.lock_pending().armed_at
    }

    pub fn precision(&self) -> PrecisionBits {
        self.shared.precision
    }

    /// Distinct bucket keys pending.
    pub fn pending_buckets(&self) -> usize {
        self.shared.lock_pending().index.len()
    }

    /// Reservations pending across all buckets.
    pub fn pending_reservations(&self) -> u64 {
        self.shared.lock_pending().index.reservation_count()
    }

    /// Buckets allocated since the tracker started.
    pub fn buckets_created(&self) -> u64 {
        self.shared.lock_pending().index.buckets_created()
    }

    pub fn sender(&self) -> &S {
        &self.shared.sender
    }

    pub fn stats(&self) -> TrackerStatsSnapshot {
        let stats = &self.shared.stats;
        TrackerStatsSnapshot {
            scheduled: stats.scheduled.load(Ordering::Relaxed),
            fires: stats.fires.load(Ordering::Relaxed),
            dispatched_batches: stats.dispatched_batches.load(Ordering::Relaxed),
            dispatched_entries: stats.dispatched_entries.load(Ordering::Relaxed),
            dispatch_failures: stats.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}

impl<S, C, T> Drop for NackTracker<S, C, T>
where
    S: RedeliverySender,
    C: Clock,
    T: Timer,
{
    fn drop(&mut self) {
        self.shared.close();
    }
}

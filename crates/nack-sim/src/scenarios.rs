use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nack_core::NackError;
use nack_tracker::clock::{Clock, SystemClock};
use nack_tracker::config::NackTrackerConfig;
use nack_tracker::sender::RedeliverySender;
use nack_tracker::timer::Timer;
use nack_tracker::tracker::{NackTracker, TrackerState};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use crate::recorder::TimestampRecorder;

/// Shape of one synthetic nack workload.
#[derive(Debug, Clone, Copy)]
pub struct LoadScenario {
    /// Distinct `(ledger, entry)` pairs nacked.
    pub reservations: u64,
    pub ledgers: u32,
    /// Delays are drawn uniformly from `[0, max_delay_ms]`.
    pub max_delay_ms: u64,
    /// Percent of entries nacked a second time with a fresh delay.
    pub renack_percent: u8,
    /// Extra wall time allowed past the largest delay before giving up.
    pub grace: Duration,
}

pub const PRACTICAL_BASELINE: LoadScenario = LoadScenario {
    reservations: 100_000,
    ledgers: 16,
    max_delay_ms: 2_000,
    renack_percent: 10,
    grace: Duration::from_secs(5),
};

pub fn practical_baseline() -> LoadScenario {
    PRACTICAL_BASELINE
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub seed: u64,
    pub precision_bits: u32,
    pub reservations: u64,
    pub scheduled: u64,
    pub dispatched_entries: u64,
    pub dispatched_batches: u64,
    pub buckets_created: u64,
    pub fires: u64,
    pub max_early_ms: i64,
    pub max_late_ms: i64,
    pub schedule_elapsed_ms: u128,
    pub total_elapsed_ms: u128,
    pub completed: bool,
}

/// Blocks while a drain is handing batches to the sender.
///
/// An empty index only means the last drain has started; its dispatch runs
/// outside the index lock. Returns `false` if still firing after `timeout`.
pub fn wait_for_dispatch_idle<S, C, T>(tracker: &NackTracker<S, C, T>, timeout: Duration) -> bool
where
    S: RedeliverySender,
    C: Clock,
    T: Timer,
{
    let deadline = Instant::now() + timeout;
    while tracker.state() == TrackerState::Firing {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

/// Nacks `scenario.reservations` entries against a live tracker and waits
/// for every reservation to be redelivered.
pub fn run_scenario(
    config: &NackTrackerConfig,
    scenario: LoadScenario,
    seed: u64,
) -> Result<LoadReport, NackError> {
    let recorder = Arc::new(TimestampRecorder::default());
    let tracker = NackTracker::start(config, Arc::clone(&recorder))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let ledgers = i64::from(scenario.ledgers.max(1));

    let started = Instant::now();
    // Earliest requested due-time per entry; a re-nack adds a later or
    // earlier reservation, and the first dispatch must honor the earliest.
    let mut due_by_entry: HashMap<(i64, u64), i64> = HashMap::new();
    let mut scheduled = 0_u64;
    let mut max_due = 0_i64;
    for i in 0..scenario.reservations {
        let ledger_id = (i as i64) % ledgers;
        let entry_id = i / ledgers as u64;
        let nacks = if rng.gen_range(0..100_u8) < scenario.renack_percent {
            2
        } else {
            1
        };
        for _ in 0..nacks {
            let delay = rng.gen_range(0..=scenario.max_delay_ms) as i64;
            let now = SystemClock.now_millis();
            tracker.schedule(ledger_id, entry_id as i64, delay)?;
            let due = now + delay;
            max_due = max_due.max(due);
            due_by_entry
                .entry((ledger_id, entry_id))
                .and_modify(|d| *d = (*d).min(due))
                .or_insert(due);
            scheduled += 1;
        }
    }
    let schedule_elapsed_ms = started.elapsed().as_millis();
    info!(
        scheduled,
        buckets = tracker.pending_buckets(),
        "scheduled synthetic nacks"
    );

    let give_up = Instant::now()
        + Duration::from_millis(
            max_due
                .saturating_sub(SystemClock.now_millis())
                .max(0) as u64,
        )
        + scenario.grace;
    let completed = loop {
        if tracker.pending_reservations() == 0 && tracker.armed_at().is_none() {
            break true;
        }
        if Instant::now() >= give_up {
            warn!(
                pending = tracker.pending_reservations(),
                "gave up waiting for redeliveries"
            );
            break false;
        }
        thread::sleep(Duration::from_millis(10));
    };
    if !wait_for_dispatch_idle(&tracker, scenario.grace) {
        warn!("last drain still dispatching; report may undercount");
    }

    let span = tracker.precision().span_millis() as i64;
    let mut first_dispatch: HashMap<(i64, u64), i64> = HashMap::new();
    for d in recorder.dispatched() {
        first_dispatch
            .entry((d.ledger_id, d.entry_id))
            .and_modify(|at| *at = (*at).min(d.at_millis))
            .or_insert(d.at_millis);
    }
    let mut max_early_ms = 0_i64;
    let mut max_late_ms = 0_i64;
    for (entry, due) in &due_by_entry {
        if let Some(at) = first_dispatch.get(entry) {
            max_early_ms = max_early_ms.max(due - at);
            max_late_ms = max_late_ms.max(at - due);
        }
    }
    if max_early_ms > span - 1 {
        warn!(max_early_ms, span, "dispatch earlier than one bucket span");
    }

    let stats = tracker.stats();
    Ok(LoadReport {
        seed,
        precision_bits: tracker.precision().get(),
        reservations: scenario.reservations,
        scheduled,
        dispatched_entries: stats.dispatched_entries,
        dispatched_batches: stats.dispatched_batches,
        buckets_created: tracker.buckets_created(),
        fires: stats.fires,
        max_early_ms,
        max_late_ms,
        schedule_elapsed_ms,
        total_elapsed_ms: started.elapsed().as_millis(),
        completed,
    })
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use nack_core::{EntryIdSet, LedgerId};
use nack_tracker::clock::{Clock, SystemClock};
use nack_tracker::sender::RedeliverySender;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("recorder rejected ledger {0}")]
pub struct RecorderError(pub LedgerId);

/// One entry handed to the sender, stamped with wall-clock dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub ledger_id: LedgerId,
    pub entry_id: u64,
    pub at_millis: i64,
}

/// Sender that timestamps every redelivered entry.
#[derive(Debug, Default)]
pub struct TimestampRecorder {
    dispatched: Mutex<Vec<Dispatched>>,
    batches: AtomicU64,
    reject_ledger: Option<LedgerId>,
}

impl TimestampRecorder {
    /// Recorder that fails every request for `ledger_id`.
    pub fn rejecting(ledger_id: LedgerId) -> Self {
        Self {
            reject_ledger: Some(ledger_id),
            ..Self::default()
        }
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

impl RedeliverySender for TimestampRecorder {
    type Error = RecorderError;

    fn redeliver(&self, ledger_id: LedgerId, entry_ids: &EntryIdSet) -> Result<(), Self::Error> {
        if self.reject_ledger == Some(ledger_id) {
            return Err(RecorderError(ledger_id));
        }
        let at_millis = SystemClock.now_millis();
        let mut dispatched = self
            .dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        dispatched.extend(entry_ids.iter().map(|entry_id| Dispatched {
            ledger_id,
            entry_id,
            at_millis,
        }));
        self.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

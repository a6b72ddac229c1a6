use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use nack_core::{EntryIdSet, LedgerId};
use thiserror::Error;

/// Outbound contract that asks the broker to redeliver entries.
///
/// Called once per ledger per drained bucket. Failures are reported back to
/// the tracker, which logs them and moves on without retrying.
pub trait RedeliverySender: Send + Sync {
    /// Transport-specific failure.
    type Error: fmt::Display;

    fn redeliver(&self, ledger_id: LedgerId, entry_ids: &EntryIdSet) -> Result<(), Self::Error>;
}

impl<S: RedeliverySender + ?Sized> RedeliverySender for std::sync::Arc<S> {
    type Error = S::Error;

    fn redeliver(&self, ledger_id: LedgerId, entry_ids: &EntryIdSet) -> Result<(), Self::Error> {
        (**self).redeliver(ledger_id, entry_ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InMemorySendError {
    #[error("connection not ready for ledger {0}")]
    NotReady(LedgerId),
}

/// Captured redelivery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeliveryRequest {
    pub ledger_id: LedgerId,
    pub entry_ids: Vec<u64>,
}

/// In-memory sender for tests and simulations.
#[derive(Debug, Default)]
pub struct InMemorySender {
    sent: Mutex<Vec<RedeliveryRequest>>,
    failing_ledgers: Mutex<HashSet<LedgerId>>,
}

impl InMemorySender {
    /// If enabled, requests for `ledger_id` fail as if the connection were down.
    pub fn set_failing(&self, ledger_id: LedgerId, failing: bool) {
        let mut failing_ledgers = self
            .failing_ledgers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if failing {
            failing_ledgers.insert(ledger_id);
        } else {
            failing_ledgers.remove(&ledger_id);
        }
    }

    /// Drains and returns all successful requests captured so far.
    pub fn take_sent(&self) -> Vec<RedeliveryRequest> {
        std::mem::take(
            &mut *self
                .sent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Number of successful requests captured and not yet taken.
    pub fn sent_len(&self) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl RedeliverySender for InMemorySender {
    type Error = InMemorySendError;

    fn redeliver(&self, ledger_id: LedgerId, entry_ids: &EntryIdSet) -> Result<(), Self::Error> {
        let failing = self
            .failing_ledgers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&ledger_id);
        if failing {
            return Err(InMemorySendError::NotReady(ledger_id));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RedeliveryRequest {
                ledger_id,
                entry_ids: entry_ids.iter().collect(),
            });
        Ok(())
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one append-only ledger.
pub type LedgerId = i64;
/// Identifier of one appended entry inside a ledger.
pub type EntryId = i64;
/// Due-time in epoch milliseconds with its low precision bits zeroed.
pub type BucketKey = i64;

/// Address of one ledger entry pending redelivery.
///
/// Batched messages collapse to their containing entry; batch indexes are
/// not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageEntryId {
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
}

impl MessageEntryId {
    pub const fn new(ledger_id: LedgerId, entry_id: EntryId) -> Self {
        Self {
            ledger_id,
            entry_id,
        }
    }
}

impl From<(LedgerId, EntryId)> for MessageEntryId {
    fn from((ledger_id, entry_id): (LedgerId, EntryId)) -> Self {
        Self::new(ledger_id, entry_id)
    }
}

impl fmt::Display for MessageEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}

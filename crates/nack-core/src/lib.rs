//! Core primitives for negative-acknowledgement redelivery tracking.
//!
//! Includes message/bucket identifiers, the due-time bucketing policy, the
//! compressed entry-id set, and base errors.

pub mod bucketing;
pub mod error;
pub mod idset;
pub mod types;

pub use bucketing::{trim_lower_bits, PrecisionBits, DEFAULT_PRECISION_BITS, MAX_PRECISION_BITS};
pub use error::NackError;
pub use idset::EntryIdSet;
pub use types::{BucketKey, EntryId, LedgerId, MessageEntryId};

//! Delayed redelivery of negatively acknowledged messages.
//!
//! Pending reservations live in a timestamp-bucketed index; one owned timer
//! is armed at the earliest bucket and, on expiry, drains every due bucket
//! and hands each ledger's entry ids to a [`sender::RedeliverySender`].

pub mod backoff;
pub mod clock;
pub mod config;
pub mod index;
pub mod sender;
pub mod timer;
pub mod tracker;

pub use nack_core::{BucketKey, EntryIdSet, MessageEntryId, NackError, PrecisionBits};

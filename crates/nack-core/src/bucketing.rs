//! Due-time bucketing policy.
//!
//! Due-times are rounded toward the past by zeroing their low-order bits, so
//! a reservation is never dispatched later than requested, only up to
//! `span - 1` milliseconds early. Larger precision collapses more
//! reservations into fewer buckets.

use crate::error::NackError;
use crate::types::BucketKey;

/// Precision used when none is configured (256 ms buckets).
pub const DEFAULT_PRECISION_BITS: u32 = 8;
/// Largest accepted precision.
pub const MAX_PRECISION_BITS: u32 = 63;

/// Zeroes the low `bits` bits of `timestamp`.
///
/// `bits` must be at most 63; [`PrecisionBits`] enforces this for callers
/// holding configuration values.
#[inline]
pub const fn trim_lower_bits(timestamp: i64, bits: u32) -> i64 {
    debug_assert!(bits <= MAX_PRECISION_BITS);
    let mask = !((1_u64 << bits) - 1);
    ((timestamp as u64) & mask) as i64
}

/// Validated bucket precision, immutable for the lifetime of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrecisionBits(u32);

impl PrecisionBits {
    /// Rejects values outside `[0, 63]`.
    pub const fn new(bits: u32) -> Result<Self, NackError> {
        if bits > MAX_PRECISION_BITS {
            return Err(NackError::InvalidPrecisionBits(bits));
        }
        Ok(Self(bits))
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Width of one bucket in milliseconds (`2^bits`).
    #[inline]
    pub const fn span_millis(self) -> u64 {
        1_u64 << self.0
    }

    /// Rounds a due-time down to the key of the bucket holding it.
    #[inline]
    pub const fn bucket_key(self, due_millis: i64) -> BucketKey {
        trim_lower_bits(due_millis, self.0)
    }
}

impl Default for PrecisionBits {
    fn default() -> Self {
        Self(DEFAULT_PRECISION_BITS)
    }
}

impl TryFrom<u32> for PrecisionBits {
    type Error = NackError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Self::new(bits)
    }
}

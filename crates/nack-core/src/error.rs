use thiserror::Error;

/// Shared error type for nack tracking primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NackError {
    /// Bucket precision outside `[0, 63]`.
    #[error("precision bits must be in [0, 63], got {0}")]
    InvalidPrecisionBits(u32),
    /// Entry ids are non-negative positions in a ledger.
    #[error("entry id must be non-negative, got {0}")]
    InvalidEntryId(i64),
    /// Malformed tracker configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    /// The tracker was torn down.
    #[error("tracker is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::NackError;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            NackError::InvalidPrecisionBits(64).to_string(),
            "precision bits must be in [0, 63], got 64"
        );
        assert_eq!(
            NackError::InvalidEntryId(-1).to_string(),
            "entry id must be non-negative, got -1"
        );
        assert_eq!(
            NackError::InvalidConfig("bad backoff").to_string(),
            "invalid config: bad backoff"
        );
        assert_eq!(NackError::Closed.to_string(), "tracker is closed");
    }
}

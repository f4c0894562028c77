// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for `dashlimit`.

use thiserror::Error;

/// Error type for limiter operations.
///
/// Admission (`allow`) and outcome reporting (`record_outcome`) are
/// infallible by contract; only `wait` and `close` surface errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The limiter has been closed; no further admissions are possible.
    #[error("limiter is closed")]
    LimiterClosed,
}

/// Result type for limiter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_closed_display() {
        let err = Error::LimiterClosed;
        assert_eq!(err.to_string(), "limiter is closed");
    }

    #[test]
    fn test_error_debug() {
        let err = Error::LimiterClosed;
        let debug = format!("{:?}", err);
        assert!(debug.contains("LimiterClosed"));
    }
}

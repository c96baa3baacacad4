//! Error types for validation failures and aborted batch work.
//!
//! Rejected GPS fixes are *not* errors: they are reported through
//! [`FilterDecision::Rejected`](crate::FilterDecision) and the filter's
//! statistics counters. Everything here is fatal to a single call only,
//! never to a tracking session.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Errors returned to the immediate caller.
#[derive(Error, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error), uniffi(flat_error))]
pub enum TrackError {
    /// Geohash precision outside the supported 1..=12 range.
    #[error("invalid geohash precision {precision} (expected 1..=12)")]
    InvalidPrecision { precision: u32 },

    /// Aggregation was asked to reduce an empty sample set.
    #[error("no location samples to aggregate")]
    EmptySampleSet,

    /// A geohash string was empty, too long, or used a symbol outside the alphabet.
    #[error("invalid geohash '{geohash}'")]
    InvalidGeohash { geohash: String },

    /// A batch was cancelled cooperatively before it finished.
    #[error("aggregation cancelled after {processed}/{total} samples")]
    Cancelled { processed: u64, total: u64 },

    /// A batch ran past its deadline.
    #[error("aggregation timed out after {processed}/{total} samples")]
    TimedOut { processed: u64, total: u64 },

    /// The pipeline actor has shut down and no longer accepts fixes.
    #[error("tracking pipeline is closed")]
    PipelineClosed,

    /// The tile store failed to apply an operation.
    #[error("tile store error: {0}")]
    Store(String),
}

impl TrackError {
    /// True for errors caused by bad caller input (as opposed to aborted work).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TrackError::InvalidPrecision { .. }
                | TrackError::EmptySampleSet
                | TrackError::InvalidGeohash { .. }
        )
    }
}

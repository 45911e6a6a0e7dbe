//! Error types for trip reconstruction.
//!
//! Only failures that must stop or be surfaced to the caller live here.
//! Segment-level and fare-level drops are not errors: see
//! [`Rejection`](crate::validation::Rejection) and
//! [`Exclusion`](crate::fare::Exclusion).

use thiserror::Error;

/// Fatal or caller-visible failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TripError {
    /// A configuration value is out of range or inconsistent.
    /// Raised before any record is processed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input line could not be parsed into a segment or trip.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A calibration stats line could not be parsed.
    #[error("Invalid calibration line: {0}")]
    InvalidCalibration(String),

    /// Distance unit selector not recognised.
    #[error("Unknown distance unit: {0}")]
    UnknownUnit(String),

    /// A configuration document could not be decoded.
    #[error("Config file error: {0}")]
    ConfigFile(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TripError>;

/// Check a configuration condition, producing [`TripError::InvalidConfig`] when it fails.
pub(crate) fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(TripError::InvalidConfig(message()))
    }
}

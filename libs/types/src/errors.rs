//! Error types for observation parsing and client input validation
//!
//! Error taxonomy using thiserror

use thiserror::Error;

/// Failure to turn an upstream record into an Observation
///
/// Any of these fails the whole ingestion poll.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObservationError {
    #[error("record has no id")]
    MissingId,

    #[error("record {id} has invalid coordinates: {reason}")]
    InvalidCoordinates { id: u64, reason: String },

    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

/// Client named a category outside the known enumeration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CategoryError {
    #[error("unknown category: {name}")]
    Unknown { name: String },
}

/// Client supplied no usable viewer identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewerIdError {
    #[error("missing viewer identifier")]
    Missing,

    #[error("viewer identifier too long: {len} > {max}")]
    TooLong { len: usize, max: usize },
}

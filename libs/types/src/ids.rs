//! Identifier types for observations, viewers and live connections
//!
//! Observation ids are assigned by the upstream source and double as the
//! ingestion cursor. Viewer ids are opaque strings handed to us by the
//! client. Connection ids are minted locally with UUID v7 so successive
//! connections of the same viewer sort chronologically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::ViewerIdError;

/// Upstream-assigned observation identifier
///
/// Monotonically non-decreasing across ingestion batches. Also used as the
/// key of the place patch pushed to viewers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ObservationId(u64);

impl ObservationId {
    /// Cursor value meaning "from the beginning"
    pub const ZERO: ObservationId = ObservationId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObservationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque per-viewer identifier
///
/// The gateway does not interpret it beyond trimming whitespace and bounding
/// its length.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewerId(String);

impl ViewerId {
    /// Longest identifier accepted from a client
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a client-supplied identifier
    pub fn parse(raw: &str) -> Result<Self, ViewerIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ViewerIdError::Missing);
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(ViewerIdError::TooLong {
                len: trimmed.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ViewerId {
    type Error = ViewerIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ViewerId> for String {
    fn from(id: ViewerId) -> Self {
        id.0
    }
}

/// Identifier of one live connection
///
/// A viewer that reconnects gets a fresh ConnectionId, which lets cleanup of a
/// superseded connection leave its successor alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new ConnectionId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

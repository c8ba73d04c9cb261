use std::collections::BTreeMap;

use live_feed::IngestStats;
use live_feed::subscriptions::ManagerStats;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Body of `POST /toggle/{category}`. Both an empty body and a missing
/// `filters` key mean "flip the named category".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub filters: Option<BTreeMap<String, bool>>,
}

impl ToggleRequest {
    pub fn parse(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid toggle body: {e}")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub evicted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub retained: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub viewers: ManagerStats,
    pub buffer: BufferStats,
    pub ingest: IngestStats,
    pub bus: BusStats,
}

//! Embedded seed dataset
//!
//! Used once per process when the upstream has never answered, so viewers see
//! something other than an empty globe. Stored in the upstream wire shape and
//! run through the same normalization as live data.

use types::errors::ObservationError;
use types::observation::{Observation, RawObservation};

const SEED_JSON: &str = include_str!("../data/seed_observations.json");

/// Parse and normalize the embedded dataset.
pub fn seed_observations() -> Result<Vec<Observation>, ObservationError> {
    let raw: Vec<RawObservation> =
        serde_json::from_str(SEED_JSON).map_err(|e| ObservationError::Malformed(e.to_string()))?;
    Observation::from_raw_batch(raw)
}

use axum::{Json, extract::State};
use types::observation::Observation;

use crate::state::AppState;

/// Destructively take up to one batch from the ingestion buffer.
pub async fn pull(State(state): State<AppState>) -> Json<Vec<Observation>> {
    Json(state.buffer.drain(state.batch.pick()))
}

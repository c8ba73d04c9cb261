use axum::{Json, extract::State};

use crate::models::{BufferStats, BusStats, StatsResponse};
use crate::state::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        viewers: state.manager.stats().await,
        buffer: BufferStats {
            len: state.buffer.len(),
            capacity: state.buffer.capacity(),
            evicted: state.buffer.evicted(),
        },
        ingest: state.counters.snapshot(),
        bus: BusStats {
            published: state.bus.published(),
            retained: state.bus.retained(),
        },
    })
}

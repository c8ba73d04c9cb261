use crate::handlers::{self, observations, sse, stats, toggle};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let mut routes = Router::new()
        .route("/sse", get(sse::stream))
        .route("/toggle/{category}", post(toggle::toggle))
        .route("/stats", get(stats::stats));

    // Pull mode runs without the emitter, so this is the only drainer
    if state.pull_endpoint {
        routes = routes.route("/observations", get(observations::pull));
    }

    routes
        .fallback(handlers::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::debug;

use crate::error::AppError;
use crate::models::ToggleRequest;
use crate::state::AppState;
use crate::viewer::Viewer;

pub async fn toggle(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(category): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let request = ToggleRequest::parse(&body)?;
    let filters = state
        .manager
        .toggle(&viewer, &category, request.filters.as_ref())
        .await?;

    debug!(viewer = %viewer, category = %category, enabled = filters.len(), "Toggle applied");
    Ok(StatusCode::NO_CONTENT)
}

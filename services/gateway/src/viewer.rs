use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use types::errors::ViewerIdError;
use types::ids::ViewerId;

use crate::error::AppError;

pub const VIEWER_HEADER: &str = "x-viewer-id";
pub const VIEWER_QUERY: &str = "viewer";

/// Opaque viewer identity: `X-Viewer-Id` header, else `?viewer=` query.
#[derive(Debug, Clone)]
pub struct Viewer(pub ViewerId);

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(header) = parts.headers.get(VIEWER_HEADER) {
            let raw = header
                .to_str()
                .map_err(|_| AppError::BadRequest("Invalid viewer header".into()))?;
            return Ok(Viewer(ViewerId::parse(raw)?));
        }

        let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(format!("Invalid query string: {e}")))?;
        match params.get(VIEWER_QUERY) {
            Some(raw) => Ok(Viewer(ViewerId::parse(raw)?)),
            None => Err(ViewerIdError::Missing.into()),
        }
    }
}

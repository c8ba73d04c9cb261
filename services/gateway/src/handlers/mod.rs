pub mod observations;
pub mod sse;
pub mod stats;
pub mod toggle;

use crate::error::AppError;

pub async fn not_found() -> AppError {
    AppError::NotFound("No such route".into())
}

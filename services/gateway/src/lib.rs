//! HTTP gateway for the live observation feed
//!
//! Thin axum adapter over `live-feed`: an SSE stream per viewer connection,
//! the filter toggle endpoint, the optional pull endpoint and a stats probe.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod viewer;

pub use config::ServerConfig;
pub use router::create_router;
pub use state::AppState;

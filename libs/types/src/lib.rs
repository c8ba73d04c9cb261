//! Types library for the wildlive observation feed
//!
//! Core type definitions shared by the ingestion/fan-out library and the
//! HTTP gateway. Everything that crosses a crate boundary is defined here so
//! the normalization and validation rules live in exactly one place.
//!
//! # Modules
//! - `ids`: Identifiers (ObservationId, ViewerId, ConnectionId)
//! - `category`: Taxonomic routing key and the fixed filterable enumeration
//! - `filter`: Per-viewer filter selection
//! - `observation`: Upstream wire shape and the canonical Observation
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod category;
pub mod filter;
pub mod observation;
pub mod errors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::category::*;
    pub use crate::filter::*;
    pub use crate::observation::*;
    pub use crate::errors::*;
}

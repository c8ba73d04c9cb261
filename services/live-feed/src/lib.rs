//! Live Feed Service
//!
//! Polls a wildlife-observation API and fans new observations out to
//! connected viewers in real time:
//! - Cursor-based upstream polling with a one-time fallback seed
//! - Bounded ingestion buffer (drop-oldest)
//! - Topic bus partitioned by category, with wildcard and optional replay
//! - Per-viewer filter selection and subscription rebuilds
//! - One cancellable delivery worker per active subscription
//!
//! # Architecture
//!
//! ```text
//!   iNaturalist API
//!         │
//!    ┌────▼────┐
//!    │Ingestor │  ← cursor, normalize, fallback
//!    └────┬────┘
//!         │
//!    ┌────▼────┐
//!    │ Buffer  │
//!    └────┬────┘
//!         │
//!    ┌────▼────┐
//!    │Emitter  │  ← drain batch, group by category
//!    └────┬────┘
//!         │
//!    ┌────▼──────────────────────┐
//!    │ Bus  observation.<cat>    │
//!    └────┬─────────┬────────────┘
//!         │         │
//!    ┌────▼───┐ ┌───▼────┐
//!    │Worker  │ │Worker  │  ← SubscriptionManager, one per pattern
//!    └────┬───┘ └───┬────┘
//!         └────┬────┘
//!         ViewerSink
//! ```

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod fallback;
pub mod ingestion;
pub mod pipeline;
pub mod replay;
pub mod subscriptions;
pub mod upstream;

pub use bus::{Bus, BusConfig, SubjectPattern, Subscription};
pub use config::FeedConfig;
pub use dispatcher::{ChannelSink, FeedEvent, SinkError, ViewerSink};
pub use ingestion::{IngestCounters, IngestStats, Ingestor, ObservationBuffer, PollOutcome};
pub use pipeline::{DrainMode, FeedPipeline, PipelineError};
pub use subscriptions::{SubscriptionError, SubscriptionManager};

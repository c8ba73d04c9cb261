use std::sync::Arc;
use std::time::Duration;

use live_feed::emitter::BatchSize;
use live_feed::{Bus, FeedPipeline, IngestCounters, ObservationBuffer, SubscriptionManager};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    pub bus: Arc<Bus>,
    pub buffer: ObservationBuffer,
    pub counters: Arc<IngestCounters>,
    /// Batch size for the pull endpoint.
    pub batch: BatchSize,
    pub viewer_queue: usize,
    pub keep_alive: Duration,
    pub pull_endpoint: bool,
}

impl AppState {
    pub fn new(pipeline: &FeedPipeline, config: &ServerConfig) -> Self {
        Self {
            manager: pipeline.manager(),
            bus: pipeline.bus(),
            buffer: pipeline.buffer().clone(),
            counters: pipeline.counters(),
            batch: config.feed.batch_size(),
            viewer_queue: config.feed.viewer_queue,
            keep_alive: config.keep_alive(),
            pull_endpoint: config.pull_endpoint,
        }
    }
}

//! Feed pipeline wiring
//!
//! ```text
//! FeedPipeline::new()    ──► bus + buffer + manager
//! FeedPipeline::start()  ──► spawn ingestor (and emitter unless pull mode)
//! FeedPipeline::stop()   ──► abort all tasks, close viewer connections
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::{Bus, BusConfig};
use crate::config::{ConfigError, FeedConfig};
use crate::emitter::{BatchSize, Emitter};
use crate::ingestion::{IngestCounters, Ingestor, ObservationBuffer};
use crate::subscriptions::SubscriptionManager;
use crate::upstream::{INaturalistSource, ObservationSource, UpstreamError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid feed config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Who removes observations from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// The emitter publishes to the bus on a timer.
    Push,
    /// Clients pull batches; no emitter runs.
    Pull,
}

pub struct FeedPipeline {
    config: FeedConfig,
    bus: Arc<Bus>,
    buffer: ObservationBuffer,
    manager: Arc<SubscriptionManager>,
    counters: Arc<IngestCounters>,
    batch: BatchSize,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedPipeline {
    pub fn new(config: FeedConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let bus = Arc::new(Bus::new(BusConfig {
            capacity: config.bus_capacity,
            replay_window: config.replay_window(),
            replay_max_entries: config.replay_max_entries,
        }));
        let manager = SubscriptionManager::new(Arc::clone(&bus), config.push_timeout());

        Ok(Self {
            buffer: ObservationBuffer::new(config.buffer_capacity),
            batch: config.batch_size(),
            counters: Arc::new(IngestCounters::default()),
            bus,
            manager,
            config,
            tasks: Vec::new(),
        })
    }

    /// Start against the configured iNaturalist endpoint.
    pub fn start(&mut self, mode: DrainMode) -> Result<(), PipelineError> {
        let source = INaturalistSource::new(&self.config)?;
        self.start_with_source(Arc::new(source), mode);
        Ok(())
    }

    pub fn start_with_source(&mut self, source: Arc<dyn ObservationSource>, mode: DrainMode) {
        let ingestor = Ingestor::new(source, self.buffer.clone())
            .with_counters(Arc::clone(&self.counters));
        self.tasks.push(ingestor.spawn(self.config.poll_interval()));

        if mode == DrainMode::Push {
            let emitter = Emitter::new(self.buffer.clone(), Arc::clone(&self.bus), self.batch);
            self.tasks.push(emitter.spawn(self.config.drain_interval()));
        }

        info!(
            mode = ?mode,
            poll_interval = ?self.config.poll_interval(),
            drain_interval = ?self.config.drain_interval(),
            batch = ?self.batch,
            "Feed pipeline started"
        );
    }

    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.manager.shutdown().await;
        info!("Feed pipeline stopped");
    }

    pub fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.bus)
    }

    pub fn buffer(&self) -> &ObservationBuffer {
        &self.buffer
    }

    pub fn manager(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.manager)
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }
}

impl Drop for FeedPipeline {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let config = FeedConfig {
            buffer_capacity: 0,
            ..FeedConfig::default()
        };
        assert!(matches!(
            FeedPipeline::new(config),
            Err(PipelineError::Config(ConfigError::Zero("buffer_capacity")))
        ));
    }

    #[tokio::test]
    async fn test_pull_mode_spawns_only_ingestor() {
        let mut pipeline = FeedPipeline::new(FeedConfig::default()).unwrap();
        let source = Arc::new(
            INaturalistSource::new(&FeedConfig {
                upstream_url: "http://127.0.0.1:9/observations".to_string(),
                ..FeedConfig::default()
            })
            .unwrap(),
        );

        pipeline.start_with_source(source, DrainMode::Pull);
        assert_eq!(pipeline.tasks.len(), 1);
        pipeline.stop().await;
        assert!(pipeline.tasks.is_empty());
    }
}

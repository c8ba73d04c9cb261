//! Drain-and-publish loop
//!
//! Each tick takes one batch from the ingestion buffer, groups it by
//! category and publishes every observation under its category subject.
//! Order within a category is the buffer order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use types::category::Category;
use types::observation::Observation;

use crate::bus::Bus;
use crate::ingestion::ObservationBuffer;

/// How many observations a single tick may drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSize {
    Fixed(usize),
    /// Uniform in `min..=max`, picked per tick.
    Random { min: usize, max: usize },
}

impl BatchSize {
    pub fn between(min: usize, max: usize) -> Self {
        if min >= max {
            BatchSize::Fixed(min)
        } else {
            BatchSize::Random { min, max }
        }
    }

    pub fn pick(&self) -> usize {
        match *self {
            BatchSize::Fixed(n) => n,
            BatchSize::Random { min, max } if min < max => {
                rand::thread_rng().gen_range(min..=max)
            }
            BatchSize::Random { min, .. } => min,
        }
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        BatchSize::Random { min: 1, max: 5 }
    }
}

pub struct Emitter {
    buffer: ObservationBuffer,
    bus: Arc<Bus>,
    batch: BatchSize,
}

impl Emitter {
    pub fn new(buffer: ObservationBuffer, bus: Arc<Bus>, batch: BatchSize) -> Self {
        Self { buffer, bus, batch }
    }

    /// Drain one batch and publish it. Returns how many were published.
    pub fn tick(&self) -> usize {
        let drained = self.buffer.drain(self.batch.pick());
        if drained.is_empty() {
            return 0;
        }

        let count = drained.len();
        for (category, group) in group_by_category(drained) {
            let size = group.len();
            for observation in group {
                self.bus.publish(&category, observation);
            }
            debug!(
                subject = %category.subject(),
                published = size,
                filterable = category.is_known(),
                "Published batch"
            );
        }
        count
    }

    /// Tick on a fixed period until the task is aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }
}

fn group_by_category(batch: Vec<Observation>) -> BTreeMap<Category, Vec<Observation>> {
    let mut groups: BTreeMap<Category, Vec<Observation>> = BTreeMap::new();
    for observation in batch {
        groups
            .entry(observation.category.clone())
            .or_default()
            .push(observation);
    }
    groups
}

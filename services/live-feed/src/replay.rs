//! Bounded replay window for late subscribers
//!
//! Retains recently published observations, tagged with their publish time,
//! for at most `window` and at most `max_entries`. Used only by the bus and
//! only under the bus lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use types::observation::Observation;

use crate::bus::SubjectPattern;

struct Retained {
    at: Instant,
    observation: Arc<Observation>,
}

pub struct ReplayWindow {
    window: Duration,
    max_entries: usize,
    entries: VecDeque<Retained>,
}

impl ReplayWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries,
            entries: VecDeque::new(),
        }
    }

    pub fn record(&mut self, observation: Arc<Observation>) {
        let now = Instant::now();
        self.prune(now);
        self.entries.push_back(Retained {
            at: now,
            observation,
        });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Retained messages matching `pattern`, oldest first.
    pub fn matching(&mut self, pattern: &SubjectPattern) -> VecDeque<Arc<Observation>> {
        self.prune(Instant::now());
        self.entries
            .iter()
            .filter(|r| pattern.matches(&r.observation.category))
            .map(|r| Arc::clone(&r.observation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.at) > self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

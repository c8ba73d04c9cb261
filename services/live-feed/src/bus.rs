//! In-process topic bus
//!
//! One broadcast channel per category plus one wildcard channel. Subjects:
//! - `observation.<category>`: a single category
//! - `observation.*` (or `observation.>`): every category
//!
//! Publish and subscribe share one lock, so a subscription's replay backlog
//! and its live receiver describe the same instant: nothing published around
//! the subscribe call is duplicated or skipped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};
use types::category::{Category, SUBJECT_PREFIX};
use types::observation::Observation;

use crate::replay::ReplayWindow;

pub const WILDCARD_SUBJECT: &str = "observation.*";

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectPattern {
    All,
    Category(Category),
}

impl SubjectPattern {
    /// Parse `observation.*`, `observation.>` or `observation.<category>`.
    pub fn parse(subject: &str) -> Option<Self> {
        let rest = subject.strip_prefix(SUBJECT_PREFIX)?;
        match rest {
            "*" | ">" => Some(SubjectPattern::All),
            "" => None,
            name if name.contains('.') => None,
            name => Some(SubjectPattern::Category(Category::from_taxon(Some(name)))),
        }
    }

    pub fn matches(&self, category: &Category) -> bool {
        match self {
            SubjectPattern::All => true,
            SubjectPattern::Category(c) => c == category,
        }
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectPattern::All => f.write_str(WILDCARD_SUBJECT),
            SubjectPattern::Category(c) => f.write_str(&c.subject()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-topic channel capacity. Slower subscribers skip ahead.
    pub capacity: usize,
    /// Replay history for new subscriptions; `None` disables retention.
    pub replay_window: Option<Duration>,
    pub replay_max_entries: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 1_024,
            replay_window: None,
            replay_max_entries: 5_000,
        }
    }
}

struct BusInner {
    topics: HashMap<Category, broadcast::Sender<Arc<Observation>>>,
    wildcard: broadcast::Sender<Arc<Observation>>,
    replay: Option<ReplayWindow>,
}

pub struct Bus {
    inner: Mutex<BusInner>,
    capacity: usize,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (wildcard, _) = broadcast::channel(capacity);
        let replay = config
            .replay_window
            .map(|window| ReplayWindow::new(window, config.replay_max_entries));

        Self {
            inner: Mutex::new(BusInner {
                topics: HashMap::new(),
                wildcard,
                replay,
            }),
            capacity,
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }

    /// Deliver to every subscriber of `category` and of the wildcard.
    /// Returns the number of receivers the message reached.
    pub fn publish(&self, category: &Category, observation: Observation) -> usize {
        let message = Arc::new(observation);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(replay) = inner.replay.as_mut() {
            replay.record(Arc::clone(&message));
        }

        let capacity = self.capacity;
        let topic = inner
            .topics
            .entry(category.clone())
            .or_insert_with(|| broadcast::channel(capacity).0);

        // send only fails when nobody is listening
        let direct = topic.send(Arc::clone(&message)).unwrap_or(0);
        let wildcard = inner.wildcard.send(message).unwrap_or(0);

        self.published.fetch_add(1, Ordering::Relaxed);
        direct + wildcard
    }

    /// Open a subscription. With a replay window configured the subscription
    /// first yields the retained history matching `pattern`.
    pub fn subscribe(&self, pattern: SubjectPattern) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let backlog = match inner.replay.as_mut() {
            Some(replay) => replay.matching(&pattern),
            None => VecDeque::new(),
        };

        let receiver = match &pattern {
            SubjectPattern::All => inner.wildcard.subscribe(),
            SubjectPattern::Category(category) => {
                let capacity = self.capacity;
                inner
                    .topics
                    .entry(category.clone())
                    .or_insert_with(|| broadcast::channel(capacity).0)
                    .subscribe()
            }
        };
        drop(guard);

        debug!(subscription = %id, pattern = %pattern, backlog = backlog.len(), "Subscribed");

        Subscription {
            id,
            pattern,
            backlog,
            receiver,
            skipped: 0,
        }
    }

    /// Stop delivery to `subscription` and release its receiver.
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(subscription = %subscription.id, pattern = %subscription.pattern, "Unsubscribed");
        drop(subscription);
    }

    /// Live receivers for exactly this pattern.
    pub fn subscriber_count(&self, pattern: &SubjectPattern) -> usize {
        let inner = self.inner.lock();
        match pattern {
            SubjectPattern::All => inner.wildcard.receiver_count(),
            SubjectPattern::Category(c) => {
                inner.topics.get(c).map_or(0, |tx| tx.receiver_count())
            }
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages currently held for replay.
    pub fn retained(&self) -> usize {
        self.inner.lock().replay.as_ref().map_or(0, ReplayWindow::len)
    }
}

/// Live subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    pattern: SubjectPattern,
    backlog: VecDeque<Arc<Observation>>,
    receiver: broadcast::Receiver<Arc<Observation>>,
    skipped: u64,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    /// Messages lost because this subscriber fell behind.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Next message, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<Arc<Observation>> {
        if let Some(retained) = self.backlog.pop_front() {
            return Some(retained);
        }
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(n)) => self.lagged(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<Arc<Observation>> {
        if let Some(retained) = self.backlog.pop_front() {
            return Some(retained);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Lagged(n)) => self.lagged(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn lagged(&mut self, n: u64) {
        self.skipped += n;
        warn!(
            subscription = %self.id,
            pattern = %self.pattern,
            skipped = n,
            total_skipped = self.skipped,
            "Subscriber lagging, messages skipped"
        );
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("backlog", &self.backlog.len())
            .field("skipped", &self.skipped)
            .finish()
    }
}

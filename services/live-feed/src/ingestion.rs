//! Ingestion layer for the live feed
//!
//! Polls the upstream source, normalizes records, enforces the cursor and
//! buffers observations for the emitter.
//!
//! Invariants:
//! - The cursor never decreases
//! - No observation with `id <= cursor` is buffered twice in a process lifetime
//! - A poll either ingests its whole batch or nothing
//! - The fallback seed is loaded at most once, and only before any real data

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use types::errors::ObservationError;
use types::ids::ObservationId;
use types::observation::Observation;

use crate::fallback;
use crate::upstream::{ObservationSource, UpstreamError};

/// Reasons a poll produced nothing.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("upstream fetch failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("upstream record rejected: {0}")]
    Parse(#[from] ObservationError),
}

/// Result of one poll, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Batch accepted; count of new observations buffered.
    Ingested(usize),
    /// Poll failed; count of fallback observations seeded (0 if none).
    Failed { fallback_seeded: usize },
}

/// Bounded FIFO shared by the ingestor (appends) and the emitter (drains).
///
/// Both operations take the same lock, so a drain never observes half of an
/// append and no item is handed out twice.
///
/// Nothing appended is lost only while the buffer stays below capacity.
/// Past that the oldest entries are evicted and counted in [`Self::evicted`].
#[derive(Clone)]
pub struct ObservationBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

struct BufferInner {
    queue: VecDeque<Observation>,
    capacity: usize,
    evicted: u64,
}

impl ObservationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferInner {
                queue: VecDeque::with_capacity(capacity.min(1_024)),
                capacity,
                evicted: 0,
            })),
        }
    }

    /// Append in order. Returns how many old entries were evicted to make room.
    pub fn append(&self, items: Vec<Observation>) -> usize {
        let mut inner = self.inner.lock();
        let mut evicted = 0;
        for item in items {
            inner.queue.push_back(item);
            if inner.queue.len() > inner.capacity {
                inner.queue.pop_front();
                evicted += 1;
            }
        }
        inner.evicted += evicted as u64;
        evicted
    }

    /// Remove and return up to `max` of the oldest entries.
    pub fn drain(&self, max: usize) -> Vec<Observation> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.queue.len());
        inner.queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Total entries evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }
}

/// Counters shared with the stats endpoint.
#[derive(Debug, Default)]
pub struct IngestCounters {
    polls: AtomicU64,
    failures: AtomicU64,
    ingested: AtomicU64,
    skipped: AtomicU64,
    seeded: AtomicU64,
    cursor: AtomicU64,
    fallback_used: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub polls: u64,
    pub failures: u64,
    pub ingested: u64,
    pub skipped: u64,
    pub seeded: u64,
    pub cursor: u64,
    pub fallback_used: bool,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            polls: self.polls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            seeded: self.seeded.load(Ordering::Relaxed),
            cursor: self.cursor.load(Ordering::Relaxed),
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
        }
    }
}

/// Polls the upstream and feeds the shared buffer.
pub struct Ingestor {
    source: Arc<dyn ObservationSource>,
    buffer: ObservationBuffer,
    cursor: ObservationId,
    received_real_data: bool,
    fallback_seeded: bool,
    counters: Arc<IngestCounters>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn ObservationSource>, buffer: ObservationBuffer) -> Self {
        info!(
            buffer_capacity = buffer.capacity(),
            "Ingestor initialized"
        );

        Self {
            source,
            buffer,
            cursor: ObservationId::ZERO,
            received_real_data: false,
            fallback_seeded: false,
            counters: Arc::new(IngestCounters::default()),
        }
    }

    /// Share an existing set of counters instead of fresh ones.
    pub fn with_counters(mut self, counters: Arc<IngestCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Run one poll cycle. Never fails from the caller's point of view.
    pub async fn poll(&mut self) -> PollOutcome {
        self.counters.polls.fetch_add(1, Ordering::Relaxed);
        let cursor = self.cursor;

        let batch = match self.fetch_batch(cursor).await {
            Ok(batch) => batch,
            Err(err) => return self.on_failure(err),
        };

        let returned = batch.len();
        let fresh: Vec<Observation> = batch.into_iter().filter(|o| o.id > cursor).collect();
        let skipped = returned - fresh.len();
        if skipped > 0 {
            self.counters.skipped.fetch_add(skipped as u64, Ordering::Relaxed);
            debug!(skipped, cursor = %cursor, "Dropping records at or below cursor");
        }

        if let Some(newest) = fresh.iter().map(|o| o.id).max() {
            self.cursor = newest;
            self.counters.cursor.store(newest.get(), Ordering::Relaxed);
        }

        let count = fresh.len();
        if count > 0 {
            self.received_real_data = true;
        }
        let evicted = self.buffer.append(fresh);
        self.counters.ingested.fetch_add(count as u64, Ordering::Relaxed);

        if evicted > 0 {
            warn!(evicted, capacity = self.buffer.capacity(), "Buffer full, evicted oldest observations");
        }
        info!(
            ingested = count,
            cursor = %self.cursor,
            buffer_size = self.buffer.len(),
            "+{} ingested",
            count
        );

        PollOutcome::Ingested(count)
    }

    async fn fetch_batch(&self, cursor: ObservationId) -> Result<Vec<Observation>, IngestionError> {
        let raw = self.source.fetch_since(cursor).await?;
        Ok(Observation::from_raw_batch(raw)?)
    }

    fn on_failure(&mut self, err: IngestionError) -> PollOutcome {
        let failures = self.counters.failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(error = %err, cursor = %self.cursor, failures, "Upstream poll failed");

        if self.received_real_data || self.fallback_seeded {
            return PollOutcome::Failed { fallback_seeded: 0 };
        }

        self.fallback_seeded = true;
        self.counters.fallback_used.store(true, Ordering::Relaxed);

        match fallback::seed_observations() {
            Ok(seed) => {
                let n = seed.len();
                self.buffer.append(seed);
                self.counters.seeded.fetch_add(n as u64, Ordering::Relaxed);
                info!(seeded = n, "No upstream data yet, buffer seeded from fallback set");
                PollOutcome::Failed { fallback_seeded: n }
            }
            Err(e) => {
                error!(error = %e, "Embedded fallback dataset is unreadable");
                PollOutcome::Failed { fallback_seeded: 0 }
            }
        }
    }

    /// Highest observation id ingested so far.
    pub fn cursor(&self) -> ObservationId {
        self.cursor
    }

    /// Whether the one-shot fallback has already run.
    pub fn fallback_seeded(&self) -> bool {
        self.fallback_seeded
    }

    pub fn buffer(&self) -> &ObservationBuffer {
        &self.buffer
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    /// Poll on a fixed period until the task is aborted. The first poll runs
    /// immediately.
    pub fn spawn(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use types::category::Category;
    use types::observation::{RawGeometry, RawObservation, RawTaxon};

    /// Replays a fixed script of responses and records the cursors it saw.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<RawObservation>, String>>>,
        cursors: Mutex<Vec<ObservationId>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<RawObservation>, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                cursors: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ObservationSource for ScriptedSource {
        async fn fetch_since(
            &self,
            cursor: ObservationId,
        ) -> Result<Vec<RawObservation>, UpstreamError> {
            self.cursors.lock().push(cursor);
            match self.script.lock().pop_front() {
                Some(Ok(batch)) => Ok(batch),
                Some(Err(msg)) => Err(UpstreamError::Unavailable(msg)),
                None => Err(UpstreamError::Unavailable("script exhausted".to_string())),
            }
        }
    }

    fn raw(id: u64, taxon: &str) -> RawObservation {
        RawObservation {
            id: Some(id),
            taxon: Some(RawTaxon {
                iconic_taxon_name: Some(taxon.to_string()),
                ..RawTaxon::default()
            }),
            ..RawObservation::default()
        }
    }

    fn obs(id: u64) -> Observation {
        Observation::from_raw(raw(id, "Aves")).unwrap()
    }

    #[test]
    fn test_buffer_fifo_drain() {
        let buffer = ObservationBuffer::new(100);
        buffer.append(vec![obs(1), obs(2), obs(3)]);

        let first = buffer.drain(2);
        assert_eq!(first.iter().map(|o| o.id.get()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(buffer.len(), 1);

        let rest = buffer.drain(10);
        assert_eq!(rest.len(), 1);
        assert!(buffer.is_empty());
        assert!(buffer.drain(5).is_empty());
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let buffer = ObservationBuffer::new(2);
        let evicted = buffer.append(vec![obs(1), obs(2), obs(3)]);

        assert_eq!(evicted, 1);
        assert_eq!(buffer.evicted(), 1);
        let kept = buffer.drain(10);
        assert_eq!(kept.iter().map(|o| o.id.get()).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_cursor_advances_to_newest() {
        // Newest first, as the upstream returns them
        let source = ScriptedSource::new(vec![Ok(vec![raw(6, "Plantae"), raw(5, "Aves")])]);
        let mut ingestor = Ingestor::new(source.clone(), ObservationBuffer::new(100));

        assert_eq!(ingestor.poll().await, PollOutcome::Ingested(2));
        assert_eq!(ingestor.cursor(), ObservationId::new(6));
        assert_eq!(ingestor.buffer().len(), 2);
        assert_eq!(source.cursors.lock()[0], ObservationId::ZERO);
    }

    #[tokio::test]
    async fn test_next_poll_requests_after_cursor() {
        let source = ScriptedSource::new(vec![Ok(vec![raw(10, "Aves")]), Ok(vec![])]);
        let mut ingestor = Ingestor::new(source.clone(), ObservationBuffer::new(100));

        ingestor.poll().await;
        assert_eq!(ingestor.poll().await, PollOutcome::Ingested(0));
        assert_eq!(
            *source.cursors.lock(),
            vec![ObservationId::ZERO, ObservationId::new(10)]
        );
    }

    #[tokio::test]
    async fn test_stale_records_not_reingested() {
        let source = ScriptedSource::new(vec![
            Ok(vec![raw(10, "Aves"), raw(9, "Aves")]),
            Ok(vec![raw(11, "Aves"), raw(10, "Aves"), raw(3, "Aves")]),
        ]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        ingestor.poll().await;
        assert_eq!(ingestor.poll().await, PollOutcome::Ingested(1));
        assert_eq!(ingestor.cursor(), ObservationId::new(11));
        assert_eq!(ingestor.buffer().len(), 3);
        assert_eq!(ingestor.counters().snapshot().skipped, 2);
    }

    #[tokio::test]
    async fn test_malformed_record_fails_whole_poll() {
        let bad = RawObservation::default();
        let source = ScriptedSource::new(vec![
            Ok(vec![raw(4, "Aves")]),
            Ok(vec![raw(6, "Aves"), bad]),
        ]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        ingestor.poll().await;
        let outcome = ingestor.poll().await;

        assert_eq!(outcome, PollOutcome::Failed { fallback_seeded: 0 });
        assert_eq!(ingestor.cursor(), ObservationId::new(4));
        assert_eq!(ingestor.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_coordinates_do_not_stall_cursor() {
        let mut odd = raw(1, "Aves");
        odd.geojson = Some(RawGeometry {
            coordinates: Some(vec![180.0001, 10.0]),
        });
        let source = ScriptedSource::new(vec![Ok(vec![raw(2, "Plantae"), odd])]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        assert_eq!(ingestor.poll().await, PollOutcome::Ingested(2));
        assert_eq!(ingestor.cursor(), ObservationId::new(2));
        assert!(!ingestor.fallback_seeded());
    }

    #[tokio::test]
    async fn test_fallback_seeds_once() {
        let source = ScriptedSource::new(vec![Err("down".into()), Err("down".into())]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        let first = ingestor.poll().await;
        let seeded = ingestor.buffer().len();
        assert_eq!(first, PollOutcome::Failed { fallback_seeded: 8 });
        assert_eq!(seeded, 8);
        assert!(ingestor.fallback_seeded());

        let second = ingestor.poll().await;
        assert_eq!(second, PollOutcome::Failed { fallback_seeded: 0 });
        assert_eq!(ingestor.buffer().len(), seeded);
        assert_eq!(ingestor.cursor(), ObservationId::ZERO);

        let stats = ingestor.counters().snapshot();
        assert_eq!(stats.failures, 2);
        assert!(stats.fallback_used);
    }

    #[tokio::test]
    async fn test_no_fallback_after_real_data() {
        let source = ScriptedSource::new(vec![Ok(vec![raw(1, "Aves")]), Err("down".into())]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        ingestor.poll().await;
        assert_eq!(
            ingestor.poll().await,
            PollOutcome::Failed { fallback_seeded: 0 }
        );
        assert!(!ingestor.fallback_seeded());
        assert_eq!(ingestor.buffer().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_success_does_not_block_fallback() {
        let source = ScriptedSource::new(vec![Ok(vec![]), Err("down".into())]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        ingestor.poll().await;
        assert!(matches!(
            ingestor.poll().await,
            PollOutcome::Failed { fallback_seeded: n } if n > 0
        ));
    }

    #[tokio::test]
    async fn test_categories_survive_ingestion() {
        let source = ScriptedSource::new(vec![Ok(vec![raw(2, "Mammalia"), raw(1, "")])]);
        let mut ingestor = Ingestor::new(source, ObservationBuffer::new(100));

        ingestor.poll().await;
        let drained = ingestor.buffer().drain(10);
        assert_eq!(drained[0].category.as_str(), "mammalia");
        assert_eq!(drained[1].category, Category::unknown());
    }
}

//! Per-subscription delivery workers
//!
//! Every active bus subscription of a viewer gets one worker task that turns
//! observations into patches and pushes them to the viewer's sink. Payloads:
//!
//! ```text
//! on connect:  { "filters": { "aves": true, "mammalia": false, ... } }
//! per message: { "_places": { "<id>": { "name": ..., "lat": ..., ... } } }
//! ```
//!
//! A failed push is never retried. The worker stops and reports the failure
//! so the owner can run disconnect cleanup for that exact connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use types::filter::FilterSet;
use types::ids::{ConnectionId, ObservationId, ViewerId};
use types::observation::{Observation, Place};

use crate::bus::{SubjectPattern, Subscription, SubscriptionId};

/// One state patch for a viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Filters(FilterSet),
    Place { id: ObservationId, place: Place },
}

impl FeedEvent {
    pub fn place(observation: &Observation) -> Self {
        FeedEvent::Place {
            id: observation.id,
            place: observation.place(),
        }
    }

    /// JSON signal patch as merged into client state.
    pub fn to_signals(&self) -> Value {
        match self {
            FeedEvent::Filters(filters) => json!({ "filters": filters }),
            FeedEvent::Place { id, place } => json!({ "_places": { (id.to_string()): place } }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("viewer connection closed")]
    Closed,

    #[error("push timed out after {0:?}")]
    TimedOut(Duration),
}

/// Transport-agnostic push to one live viewer connection.
#[async_trait]
pub trait ViewerSink: Send + Sync {
    async fn push(&self, event: FeedEvent) -> Result<(), SinkError>;
}

/// Sink backed by a bounded queue; the transport drains the receiver.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<FeedEvent>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl ViewerSink for ChannelSink {
    async fn push(&self, event: FeedEvent) -> Result<(), SinkError> {
        self.tx.send(event).await.map_err(|_| SinkError::Closed)
    }
}

/// Push with an upper bound on how long a slow viewer may hold the caller.
pub async fn push_with_timeout(
    sink: &dyn ViewerSink,
    event: FeedEvent,
    timeout: Duration,
) -> Result<(), SinkError> {
    match tokio::time::timeout(timeout, sink.push(event)).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::TimedOut(timeout)),
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    SinkFailed(SinkError),
    BusClosed,
    Aborted,
}

/// Owner's handle to a running worker.
///
/// [`WorkerHandle::close`] cancels and joins; dropping the handle cancels
/// without waiting.
pub struct WorkerHandle {
    subscription_id: SubscriptionId,
    pattern: SubjectPattern,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the worker and wait until it has stopped. Nothing is pushed
    /// after this returns.
    pub async fn close(mut self) -> WorkerExit {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        (&mut self.task).await.unwrap_or(WorkerExit::Aborted)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Start a worker for `subscription`. `on_failure` runs once, after the
/// worker has stopped, if a push failed.
pub fn spawn_worker<F>(
    viewer: ViewerId,
    connection: ConnectionId,
    mut subscription: Subscription,
    sink: Arc<dyn ViewerSink>,
    push_timeout: Duration,
    on_failure: F,
) -> WorkerHandle
where
    F: FnOnce(SinkError) + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    let subscription_id = subscription.id();
    let pattern = subscription.pattern().clone();

    let task = tokio::spawn(async move {
        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancel_rx => break WorkerExit::Cancelled,
                next = subscription.next() => next,
            };
            let Some(observation) = next else {
                break WorkerExit::BusClosed;
            };

            let event = FeedEvent::place(&observation);
            let pushed = tokio::select! {
                biased;
                _ = &mut cancel_rx => break WorkerExit::Cancelled,
                pushed = push_with_timeout(sink.as_ref(), event, push_timeout) => pushed,
            };
            if let Err(err) = pushed {
                break WorkerExit::SinkFailed(err);
            }
        };

        debug!(
            viewer = %viewer,
            connection = %connection,
            subscription = %subscription.id(),
            skipped = subscription.skipped(),
            exit = ?exit,
            "Worker stopped"
        );
        drop(subscription);

        if let WorkerExit::SinkFailed(err) = &exit {
            warn!(viewer = %viewer, connection = %connection, error = %err, "Push failed, dropping connection");
            on_failure(err.clone());
        }
        exit
    });

    WorkerHandle {
        subscription_id,
        pattern,
        cancel: Some(cancel_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, BusConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use types::category::Category;
    use types::observation::{RawObservation, RawTaxon};

    fn obs(id: u64, taxon: &str) -> Observation {
        let raw = RawObservation {
            id: Some(id),
            species_guess: Some(format!("sighting {id}")),
            taxon: Some(RawTaxon {
                iconic_taxon_name: Some(taxon.to_string()),
                ..RawTaxon::default()
            }),
            ..RawObservation::default()
        };
        Observation::from_raw(raw).unwrap()
    }

    fn viewer() -> ViewerId {
        ViewerId::parse("viewer-1").unwrap()
    }

    /// Sink that never completes a push.
    struct StuckSink;

    #[async_trait]
    impl ViewerSink for StuckSink {
        async fn push(&self, _event: FeedEvent) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_place_patch_shape() {
        let event = FeedEvent::place(&obs(42, "Aves"));
        let json = event.to_signals();
        assert_eq!(json["_places"]["42"]["name"], "sighting 42");
        assert_eq!(json["_places"]["42"]["category"], "aves");
        assert!(json["_places"]["42"].get("id").is_none());
    }

    #[test]
    fn test_filters_patch_shape() {
        let filters = FilterSet::from_names(["plantae"]).unwrap();
        let json = FeedEvent::Filters(filters).to_signals();
        assert_eq!(json["filters"]["plantae"], true);
        assert_eq!(json["filters"]["aves"], false);
    }

    #[tokio::test]
    async fn test_worker_pushes_in_order() {
        let bus = Bus::new(BusConfig::default());
        let sub = bus.subscribe(SubjectPattern::All);
        let (sink, mut rx) = ChannelSink::channel(8);
        let handle = spawn_worker(
            viewer(),
            ConnectionId::new(),
            sub,
            Arc::new(sink),
            Duration::from_secs(5),
            |_| {},
        );

        for id in [1, 2] {
            let o = obs(id, "Aves");
            bus.publish(&o.category.clone(), o);
        }
        assert!(matches!(rx.recv().await, Some(FeedEvent::Place { id, .. }) if id.get() == 1));
        assert!(matches!(rx.recv().await, Some(FeedEvent::Place { id, .. }) if id.get() == 2));

        assert_eq!(handle.close().await, WorkerExit::Cancelled);
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let bus = Bus::new(BusConfig::default());
        let pattern = SubjectPattern::Category(Category::from_taxon(Some("aves")));
        let sub = bus.subscribe(pattern.clone());
        let (sink, _rx) = ChannelSink::channel(8);
        let handle = spawn_worker(
            viewer(),
            ConnectionId::new(),
            sub,
            Arc::new(sink),
            Duration::from_secs(5),
            |_| {},
        );

        handle.close().await;
        assert_eq!(bus.subscriber_count(&pattern), 0);
    }

    #[tokio::test]
    async fn test_closed_sink_reports_failure_once() {
        let bus = Bus::new(BusConfig::default());
        let sub = bus.subscribe(SubjectPattern::All);
        let (sink, rx) = ChannelSink::channel(8);
        drop(rx);

        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let handle = spawn_worker(
            viewer(),
            ConnectionId::new(),
            sub,
            Arc::new(sink),
            Duration::from_secs(5),
            move |err| {
                assert_eq!(err, SinkError::Closed);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let o = obs(1, "Aves");
        bus.publish(&o.category.clone(), o);
        let o = obs(2, "Aves");
        bus.publish(&o.category.clone(), o);

        assert_eq!(
            handle.task_exit_for_test().await,
            WorkerExit::SinkFailed(SinkError::Closed)
        );
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_times_out() {
        let bus = Bus::new(BusConfig::default());
        let sub = bus.subscribe(SubjectPattern::All);
        let timeout = Duration::from_secs(5);
        let handle = spawn_worker(viewer(), ConnectionId::new(), sub, Arc::new(StuckSink), timeout, |_| {});

        let o = obs(1, "Aves");
        bus.publish(&o.category.clone(), o);

        // Paused clock auto-advances once every task is idle
        let exit = handle.task_exit_for_test().await;
        assert_eq!(exit, WorkerExit::SinkFailed(SinkError::TimedOut(timeout)));
    }

    #[tokio::test]
    async fn test_close_cancels_mid_push() {
        let bus = Bus::new(BusConfig::default());
        let sub = bus.subscribe(SubjectPattern::All);
        let handle = spawn_worker(
            viewer(),
            ConnectionId::new(),
            sub,
            Arc::new(StuckSink),
            Duration::from_secs(3600),
            |_| panic!("cancellation is not a failure"),
        );

        let o = obs(1, "Aves");
        bus.publish(&o.category.clone(), o);
        tokio::task::yield_now().await;

        assert_eq!(handle.close().await, WorkerExit::Cancelled);
    }

    impl WorkerHandle {
        /// Wait for the worker to stop on its own.
        async fn task_exit_for_test(mut self) -> WorkerExit {
            (&mut self.task).await.unwrap_or(WorkerExit::Aborted)
        }
    }
}

//! Per-viewer subscription management
//!
//! Owns, for every viewer, the saved filter selection and (while connected)
//! the live connection with one delivery worker per active subscription.
//!
//! Rules:
//! - At most one live connection per viewer; connecting again supersedes
//! - Empty filters subscribe to the wildcard, otherwise one subscription per
//!   enabled category
//! - A toggle rebuilds the whole set: every old worker is closed and joined,
//!   the new filters are pushed, then the new workers are opened
//! - Saved filters outlive disconnects
//!
//! Each viewer has its own async lock, held for the whole of a connect,
//! toggle or disconnect. Operations on one viewer are serialized; a slow
//! push to one viewer never holds up another.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use types::category::Category;
use types::errors::CategoryError;
use types::filter::FilterSet;
use types::ids::{ConnectionId, ViewerId};

use crate::bus::{Bus, SubjectPattern};
use crate::dispatcher::{
    push_with_timeout, spawn_worker, FeedEvent, SinkError, ViewerSink, WorkerHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Category(#[from] CategoryError),

    #[error("could not open viewer connection: {0}")]
    Open(SinkError),
}

/// Bus patterns for a filter selection.
pub fn subscription_patterns(filters: &FilterSet) -> Vec<SubjectPattern> {
    if filters.is_all() {
        vec![SubjectPattern::All]
    } else {
        filters
            .iter()
            .cloned()
            .map(SubjectPattern::Category)
            .collect()
    }
}

struct LiveViewer {
    connection: ConnectionId,
    sink: Arc<dyn ViewerSink>,
    workers: Vec<WorkerHandle>,
}

#[derive(Default)]
struct ViewerSlot {
    saved: Option<FilterSet>,
    live: Option<LiveViewer>,
}

type SharedSlot = Arc<Mutex<ViewerSlot>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub connected: usize,
    pub saved_filters: usize,
    pub workers: usize,
}

pub struct SubscriptionManager {
    bus: Arc<Bus>,
    push_timeout: Duration,
    // Slots are never removed, so every caller for a viewer locks the same one
    viewers: parking_lot::Mutex<HashMap<ViewerId, SharedSlot>>,
    connected: AtomicUsize,
    workers: AtomicUsize,
    saved: AtomicUsize,
    me: Weak<SubscriptionManager>,
}

impl SubscriptionManager {
    pub fn new(bus: Arc<Bus>, push_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            bus,
            push_timeout,
            viewers: parking_lot::Mutex::new(HashMap::new()),
            connected: AtomicUsize::new(0),
            workers: AtomicUsize::new(0),
            saved: AtomicUsize::new(0),
            me: me.clone(),
        })
    }

    /// Open a live connection for `viewer`, superseding any existing one.
    ///
    /// The saved filter set is pushed first; subscriptions are opened only
    /// once that push succeeded.
    pub async fn connect(
        &self,
        viewer: ViewerId,
        sink: Arc<dyn ViewerSink>,
    ) -> Result<ConnectionId, SubscriptionError> {
        let slot = self.slot(&viewer);
        let mut slot = slot.lock().await;

        if let Some(previous) = self.take_live(&mut slot) {
            info!(viewer = %viewer, connection = %previous.connection, "Superseding live connection");
            close_workers(previous.workers).await;
        }

        let filters = slot.saved.clone().unwrap_or_default();
        push_with_timeout(sink.as_ref(), FeedEvent::Filters(filters.clone()), self.push_timeout)
            .await
            .map_err(SubscriptionError::Open)?;

        let connection = ConnectionId::new();
        let workers = self.open_workers(&viewer, connection, &sink, &filters);
        info!(
            viewer = %viewer,
            connection = %connection,
            subscriptions = workers.len(),
            "Viewer connected"
        );

        self.put_live(
            &mut slot,
            LiveViewer {
                connection,
                sink,
                workers,
            },
        );
        Ok(connection)
    }

    /// Change a viewer's filters.
    ///
    /// `category` must be a known category. With `desired` the new set is
    /// exactly the enabled entries of `desired`; without it `category` is
    /// flipped in the saved set. Invalid input changes nothing.
    pub async fn toggle(
        &self,
        viewer: &ViewerId,
        category: &str,
        desired: Option<&BTreeMap<String, bool>>,
    ) -> Result<FilterSet, SubscriptionError> {
        let category = Category::known(category)?;
        let desired = desired.map(FilterSet::from_toggles).transpose()?;

        let slot = self.slot(viewer);
        let mut slot = slot.lock().await;
        let filters = match desired {
            Some(set) => set,
            None => slot
                .saved
                .clone()
                .unwrap_or_default()
                .toggled(&category),
        };
        self.save(&mut slot, filters.clone());

        let Some(mut live) = self.take_live(&mut slot) else {
            debug!(viewer = %viewer, filters = ?filters, "Filters saved for offline viewer");
            return Ok(filters);
        };

        close_workers(std::mem::take(&mut live.workers)).await;

        let pushed = push_with_timeout(
            live.sink.as_ref(),
            FeedEvent::Filters(filters.clone()),
            self.push_timeout,
        )
        .await;
        if let Err(err) = pushed {
            warn!(
                viewer = %viewer,
                connection = %live.connection,
                error = %err,
                "Filter update push failed, dropping connection"
            );
            return Ok(filters);
        }

        live.workers = self.open_workers(viewer, live.connection, &live.sink, &filters);
        info!(
            viewer = %viewer,
            toggled = %category,
            subscriptions = live.workers.len(),
            "Subscriptions rebuilt"
        );
        self.put_live(&mut slot, live);

        Ok(filters)
    }

    /// Tear down the viewer's live connection, whichever it is.
    pub async fn disconnect(&self, viewer: &ViewerId) -> bool {
        let Some(slot) = self.existing_slot(viewer) else {
            return false;
        };
        let mut slot = slot.lock().await;
        match self.take_live(&mut slot) {
            Some(live) => {
                close_workers(live.workers).await;
                info!(viewer = %viewer, connection = %live.connection, "Viewer disconnected");
                true
            }
            None => false,
        }
    }

    /// Tear down `connection` only if it is still the viewer's live one.
    /// Late cleanup from a superseded connection is a no-op.
    pub async fn disconnect_connection(&self, viewer: &ViewerId, connection: ConnectionId) -> bool {
        let Some(slot) = self.existing_slot(viewer) else {
            return false;
        };
        let mut slot = slot.lock().await;
        if slot.live.as_ref().map(|l| l.connection) != Some(connection) {
            debug!(viewer = %viewer, connection = %connection, "Stale connection cleanup ignored");
            return false;
        }
        if let Some(live) = self.take_live(&mut slot) {
            close_workers(live.workers).await;
            info!(viewer = %viewer, connection = %connection, "Viewer disconnected");
        }
        true
    }

    /// Saved filters for `viewer` (empty when never set).
    pub async fn filters(&self, viewer: &ViewerId) -> FilterSet {
        match self.existing_slot(viewer) {
            Some(slot) => slot.lock().await.saved.clone().unwrap_or_default(),
            None => FilterSet::default(),
        }
    }

    /// Patterns of the viewer's running workers, sorted.
    pub async fn active_patterns(&self, viewer: &ViewerId) -> Vec<SubjectPattern> {
        let Some(slot) = self.existing_slot(viewer) else {
            return Vec::new();
        };
        let slot = slot.lock().await;
        let mut patterns: Vec<SubjectPattern> = slot
            .live
            .as_ref()
            .map(|l| l.workers.iter().map(|w| w.pattern().clone()).collect())
            .unwrap_or_default();
        patterns.sort();
        patterns
    }

    pub async fn connection(&self, viewer: &ViewerId) -> Option<ConnectionId> {
        let slot = self.existing_slot(viewer)?;
        let slot = slot.lock().await;
        slot.live.as_ref().map(|l| l.connection)
    }

    pub async fn viewer_count(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            connected: self.connected.load(Ordering::Acquire),
            saved_filters: self.saved.load(Ordering::Acquire),
            workers: self.workers.load(Ordering::Acquire),
        }
    }

    /// Close every live connection. Saved filters are kept.
    pub async fn shutdown(&self) {
        let slots: Vec<SharedSlot> = self.viewers.lock().values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            let mut slot = slot.lock().await;
            if let Some(live) = self.take_live(&mut slot) {
                close_workers(live.workers).await;
                count += 1;
            }
        }
        info!(closed = count, "Subscription manager shut down");
    }

    fn slot(&self, viewer: &ViewerId) -> SharedSlot {
        Arc::clone(self.viewers.lock().entry(viewer.clone()).or_default())
    }

    fn existing_slot(&self, viewer: &ViewerId) -> Option<SharedSlot> {
        self.viewers.lock().get(viewer).cloned()
    }

    fn save(&self, slot: &mut ViewerSlot, filters: FilterSet) {
        if slot.saved.replace(filters).is_none() {
            self.saved.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn take_live(&self, slot: &mut ViewerSlot) -> Option<LiveViewer> {
        let live = slot.live.take()?;
        self.connected.fetch_sub(1, Ordering::AcqRel);
        self.workers.fetch_sub(live.workers.len(), Ordering::AcqRel);
        Some(live)
    }

    fn put_live(&self, slot: &mut ViewerSlot, live: LiveViewer) {
        self.connected.fetch_add(1, Ordering::AcqRel);
        self.workers.fetch_add(live.workers.len(), Ordering::AcqRel);
        slot.live = Some(live);
    }

    fn open_workers(
        &self,
        viewer: &ViewerId,
        connection: ConnectionId,
        sink: &Arc<dyn ViewerSink>,
        filters: &FilterSet,
    ) -> Vec<WorkerHandle> {
        subscription_patterns(filters)
            .into_iter()
            .map(|pattern| {
                let subscription = self.bus.subscribe(pattern);
                let manager = self.me.clone();
                let failed_viewer = viewer.clone();
                spawn_worker(
                    viewer.clone(),
                    connection,
                    subscription,
                    Arc::clone(sink),
                    self.push_timeout,
                    move |_err| {
                        tokio::spawn(async move {
                            if let Some(manager) = manager.upgrade() {
                                manager
                                    .disconnect_connection(&failed_viewer, connection)
                                    .await;
                            }
                        });
                    },
                )
            })
            .collect()
    }
}

async fn close_workers(workers: Vec<WorkerHandle>) {
    for worker in workers {
        let id = worker.subscription_id();
        let exit = worker.close().await;
        debug!(subscription = %id, exit = ?exit, "Worker closed");
    }
}

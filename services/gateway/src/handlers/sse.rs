use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use live_feed::{ChannelSink, FeedEvent, SubscriptionManager};
use tokio::sync::mpsc;
use types::ids::{ConnectionId, ViewerId};

use crate::error::AppError;
use crate::state::AppState;
use crate::viewer::Viewer;

pub const PATCH_EVENT: &str = "patch";

/// Outbound events of one live connection. Dropping the stream (client gone)
/// tears the connection down in the manager.
pub struct ViewerStream {
    rx: mpsc::Receiver<FeedEvent>,
    manager: Arc<SubscriptionManager>,
    viewer: ViewerId,
    connection: ConnectionId,
}

impl Stream for ViewerStream {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ViewerStream {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let manager = Arc::clone(&self.manager);
        let viewer = self.viewer.clone();
        let connection = self.connection;
        runtime.spawn(async move {
            manager.disconnect_connection(&viewer, connection).await;
        });
    }
}

pub fn to_sse_event(event: &FeedEvent) -> Event {
    Event::default()
        .event(PATCH_EVENT)
        .data(event.to_signals().to_string())
}

pub async fn stream(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (sink, rx) = ChannelSink::channel(state.viewer_queue);
    let connection = state
        .manager
        .connect(viewer.clone(), Arc::new(sink))
        .await?;

    let events = ViewerStream {
        rx,
        manager: Arc::clone(&state.manager),
        viewer,
        connection,
    }
    .map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

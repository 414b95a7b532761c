use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use pkg_metrics::{MetricsRegistry, WATCH_STREAMS};
use pkg_state::watch::WatchEvent;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// Keeps the open-stream gauge accurate for as long as the stream lives.
struct StreamGuard(Arc<MetricsRegistry>);

impl StreamGuard {
    fn new(metrics: Arc<MetricsRegistry>) -> Self {
        metrics.gauge_inc(WATCH_STREAMS);
        Self(metrics)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.gauge_dec(WATCH_STREAMS);
    }
}

fn to_sse(event: &WatchEvent) -> Option<Result<Event, Infallible>> {
    let data = serde_json::to_string(event).ok()?;
    Some(Ok(Event::default().id(event.seq.to_string()).data(data)))
}

/// GET /api/v1/watch: SSE stream of store changes.
///
/// Retained events after `seq` are replayed first, then live events follow.
/// Only keys starting with `prefix` are sent.
pub async fn watch_events(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let prefix = query.prefix.unwrap_or_default();
    let from_seq = query.seq.unwrap_or(0);

    info!(
        "Watch subscription: prefix='{}', from_seq={}",
        prefix, from_seq
    );

    // Subscribe before reading the backlog so nothing falls between the two.
    let events = state.store.events();
    let rx = events.subscribe();
    let buffered = events.events_since(from_seq).await;
    let last_buffered = buffered.last().map(|e| e.seq).unwrap_or(from_seq);

    let replay_prefix = prefix.clone();
    let buffered_stream = tokio_stream::iter(
        buffered
            .into_iter()
            .filter(move |e| e.key.starts_with(&replay_prefix))
            .filter_map(|e| to_sse(&e)),
    );

    let guard = StreamGuard::new(state.metrics.clone());
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| {
        let _guard = &guard;
        match result {
            Ok(event) if event.seq > last_buffered && event.key.starts_with(&prefix) => {
                to_sse(&event)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Watch stream lagged: {}", e);
                None
            }
        }
    });

    Sse::new(buffered_stream.chain(live_stream)).keep_alive(KeepAlive::default())
}

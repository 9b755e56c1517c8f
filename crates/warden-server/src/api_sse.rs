//! SSE stream of activity, connection and moderation events.

use crate::AppState;
use axum::{
    extract::Extension,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
};
use futures_util::Stream;
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use warden_rules::ModerationNotice;
use warden_types::NormalizedEvent;

/// Handler for `GET /events/stream`.
///
/// Each SSE event is named after its channel: `activity` carries a
/// normalized event, `connection` a push-connection lifecycle change and
/// `moderation` an engine notice. Activity and enforcement notices that name
/// a group outside the moderation allow-list are not forwarded.
pub async fn get_event_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let gate = Arc::clone(state.engine.gate());
    let activity = channel_stream("activity", state.bus.receiver(), {
        let gate = Arc::clone(&gate);
        move |event: &NormalizedEvent| event.group_id().map_or(true, |g| gate.is_allowed(g))
    });
    let connection = channel_stream("connection", state.bridge.events(), |_| true);
    let moderation = channel_stream("moderation", state.engine.subscribe(), move |notice| {
        match notice {
            ModerationNotice::Enforced { record } => gate.is_allowed(&record.group_id),
            _ => true,
        }
    });

    Sse::new(activity.merge(connection).merge(moderation)).keep_alive(KeepAlive::default())
}

fn channel_stream<T, F>(
    name: &'static str,
    rx: broadcast::Receiver<T>,
    visible: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Serialize + Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(item) if !visible(&item) => None,
        Ok(item) => match serde_json::to_string(&item) {
            Ok(data) => Some(Ok(Event::default().event(name).data(data))),
            Err(e) => {
                tracing::error!(channel = name, "failed to serialize event: {}", e);
                None
            }
        },
        Err(broadcast_error) => {
            tracing::warn!(
                channel = name,
                error = %broadcast_error,
                "SSE stream lagged; events were dropped for this subscriber"
            );
            None
        }
    })
}

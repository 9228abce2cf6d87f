//! SSE fan-out and channel publishing over the event hub.

use super::AppState;
use crate::hub::EventHub;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Channel used when a subscriber or publisher does not name one.
pub const DEFAULT_CHANNEL: &str = "events";

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub channel: Option<String>,
}

/// Unsubscribes when the SSE connection goes away, however it goes away.
struct HubGuard {
    hub: Arc<EventHub>,
    channel: String,
    id: u64,
}

impl Drop for HubGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe_id(&self.channel, self.id);
    }
}

pub async fn subscribe_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl futures_util::stream::Stream<Item = Result<Event, Infallible>>> {
    let channel = query.channel.unwrap_or_else(|| DEFAULT_CHANNEL.to_owned());
    let mut subscription = state.hub.subscribe(&channel);
    let guard = HubGuard {
        hub: state.hub.clone(),
        channel,
        id: subscription.id(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("connected").data("{}"));
        while let Some(message) = subscription.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => yield Ok(Event::default().event(message.kind.as_str()).data(json)),
                Err(_) => {}
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[derive(Debug, Deserialize)]
pub struct PublishBody {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub async fn publish_channel(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    axum::Json(body): axum::Json<PublishBody>,
) -> StatusCode {
    state.hub.publish(&channel, &body.kind, &body.payload);
    StatusCode::ACCEPTED
}

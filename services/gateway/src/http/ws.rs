//! WebSocket fan-out from the event hub.
//!
//! The upgrade requires a bearer token when one is configured — either an
//! `Authorization: Bearer` header or a `?token=` query parameter (browser
//! WebSocket clients cannot set headers).

use super::AppState;
use super::events::DEFAULT_CHANNEL;
use crate::hub::EventHub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub channel: Option<String>,
    pub token: Option<String>,
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer)
        .map(ToOwned::to_owned)
}

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = &state.auth_token {
        let presented = token_from_headers(&headers).or_else(|| query.token.clone());
        if presented.as_deref() != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let channel = query.channel.unwrap_or_else(|| DEFAULT_CHANNEL.to_owned());
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, hub, channel))
}

async fn serve_socket(mut socket: WebSocket, hub: Arc<EventHub>, channel: String) {
    let mut subscription = hub.subscribe(&channel);
    debug!(channel = %subscription.channel(), "websocket subscriber connected");
    loop {
        tokio::select! {
            message = subscription.recv() => match message {
                Some(message) => {
                    let Ok(json) = serde_json::to_string(&message) else { continue };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(Message::Ping(data))) => {
                    let _ = socket.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    hub.unsubscribe(&subscription);
    debug!(channel = %subscription.channel(), "websocket subscriber disconnected");
}

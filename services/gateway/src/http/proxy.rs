//! Request proxying: HTTP in, framed worker exchange out.
//!
//! Every request that misses the control routes lands here.  The request is
//! converted to the wire shape (multi-valued headers, opaque body, an id the
//! client may supply via `X-Request-Id`), dispatched buffered or — when
//! `X-Go-Stream: 1` is set — streaming, and the observed latency is fed to
//! the adaptive classifier either way.

use super::AppState;
use crate::worker::{StreamEvent, WorkerError};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;
use wg_protocol::framing::MAX_FRAME_BYTES;
use wg_protocol::{REQUEST_ID_HEADER, STREAM_REQUEST_HEADER, WorkerRequest};

pub async fn forward(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    // Bodies above the frame limit could never reach a worker anyway.
    let body_bytes = match axum::body::to_bytes(body, MAX_FRAME_BYTES).await {
        Ok(bytes) => bytes,
        Err(error) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body: {error}"),
            )
                .into_response();
        }
    };

    let wants_stream = parts
        .headers
        .get(STREAM_REQUEST_HEADER)
        .and_then(|value| value.to_str().ok())
        == Some("1");
    let route_path = parts.uri.path().to_owned();
    let worker_request = build_worker_request(&parts, &body_bytes);

    let response = if wants_stream {
        stream_response(&state, worker_request).await
    } else {
        buffered_response(&state, worker_request).await
    };

    state.note_proxied();
    state
        .supervisor
        .record_latency(&route_path, started.elapsed())
        .await;
    response
}

// ---------------------------------------------------------------------------
// Request conversion
// ---------------------------------------------------------------------------

fn build_worker_request(parts: &Parts, body: &[u8]) -> WorkerRequest {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for name in parts.headers.keys() {
        let values: Vec<String> = parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
            .collect();
        if !values.is_empty() {
            headers.insert(name.as_str().to_owned(), values);
        }
    }

    let id = parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);

    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_owned(), |pq| pq.as_str().to_owned());

    WorkerRequest {
        id,
        method: parts.method.as_str().to_ascii_uppercase(),
        path,
        headers,
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

// ---------------------------------------------------------------------------
// Buffered path
// ---------------------------------------------------------------------------

async fn buffered_response(state: &AppState, request: WorkerRequest) -> Response {
    match state.supervisor.dispatch(request).await {
        Ok(reply) => {
            let status = StatusCode::from_u16(reply.effective_status()).unwrap_or_else(|_| {
                warn!(status = reply.status, "worker returned an unusable status code");
                StatusCode::INTERNAL_SERVER_ERROR
            });
            let mut builder = Response::builder().status(status);
            for (name, value) in &reply.headers {
                match (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::try_from(value.as_str()),
                ) {
                    (Ok(name), Ok(value)) => builder = builder.header(name, value),
                    _ => warn!(header = %name, "skipping unrepresentable response header"),
                }
            }
            builder
                .body(Body::from(reply.body.into_bytes()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(error) => worker_error_response(&error),
    }
}

// ---------------------------------------------------------------------------
// Streaming path
// ---------------------------------------------------------------------------

async fn stream_response(state: &AppState, request: WorkerRequest) -> Response {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(32);
    let supervisor = state.supervisor.clone();
    let dispatch =
        tokio::spawn(async move { supervisor.dispatch_stream(request, &tx).await });

    match rx.recv().await {
        Some(StreamEvent::Start { status, headers }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let mut builder = Response::builder().status(status);
            for (name, value) in &headers {
                match (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::try_from(value.as_str()),
                ) {
                    // Repeated names append, so cookie-style headers stay
                    // distinct instances on the response.
                    (Ok(name), Ok(value)) => builder = builder.header(name, value),
                    _ => warn!(header = %name, "skipping unrepresentable stream header"),
                }
            }
            let body = Body::from_stream(async_stream::stream! {
                while let Some(event) = rx.recv().await {
                    match event {
                        StreamEvent::Data(bytes) => {
                            yield Ok::<bytes::Bytes, std::io::Error>(bytes::Bytes::from(bytes));
                        }
                        StreamEvent::End => break,
                        StreamEvent::Fail(message) => {
                            // Abort the connection mid-body; the client must
                            // not mistake a broken stream for a complete one.
                            yield Err(std::io::Error::other(message));
                            break;
                        }
                        StreamEvent::Start { .. } => {}
                    }
                }
            });
            builder
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        // The stream failed before any headers were sent: a full error
        // response is still possible.
        Some(StreamEvent::Fail(message)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        None => match dispatch.await {
            Ok(Err(error)) => worker_error_response(&error),
            _ => StatusCode::BAD_GATEWAY.into_response(),
        },
    }
}

// ---------------------------------------------------------------------------
// Error → status mapping (frontend concern, lives only here)
// ---------------------------------------------------------------------------

pub(crate) fn worker_error_response(error: &WorkerError) -> Response {
    let status = match error {
        WorkerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        WorkerError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
        error if error.is_disconnect() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}

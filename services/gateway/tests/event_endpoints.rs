//! SSE and WebSocket fan-out over a live listener.

use futures_util::{SinkExt, StreamExt};
use gateway::classify::SlowPolicy;
use gateway::http::{AppState, build_router};
use gateway::hub::EventHub;
use gateway::supervisor::Supervisor;
use gateway::worker::WorkerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn serve(auth_token: Option<String>) -> (SocketAddr, Arc<EventHub>) {
    let worker_cfg = WorkerConfig {
        command: env!("CARGO_BIN_EXE_worker-stub").to_owned(),
        entrypoint: "worker.php".to_owned(),
        marker: "composer.json".to_owned(),
        project_root: std::env::temp_dir(),
        max_requests: 100,
        request_timeout: Duration::from_secs(5),
    };
    let supervisor = Arc::new(Supervisor::new(worker_cfg, 1, 1, SlowPolicy::default()));
    let hub = Arc::new(EventHub::new());
    let state = AppState::new(supervisor, hub.clone(), auth_token);
    let router = build_router(state, None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve failed");
    });
    (addr, hub)
}

/// Poll until the hub sees a subscriber on `channel` so a publish cannot
/// race ahead of the subscription.
async fn wait_for_subscriber(hub: &EventHub, channel: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while hub.subscriber_count(channel) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(hub.subscriber_count(channel) > 0, "subscriber never registered");
}

#[tokio::test]
async fn sse_delivers_published_events() {
    let (addr, hub) = serve(None).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /api/v1/events?channel=jobs HTTP/1.1\r\n\
              Host: localhost\r\nAccept: text/event-stream\r\n\r\n",
        )
        .await
        .unwrap();

    wait_for_subscriber(&hub, "jobs").await;
    hub.publish("jobs", "job_started", &serde_json::json!({"job": 42}));

    let mut collected = String::new();
    let mut buf = vec![0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !collected.contains("job_started") && tokio::time::Instant::now() < deadline {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("read should not stall")
            .unwrap();
        if n == 0 {
            break;
        }
        collected.push_str(&String::from_utf8_lossy(&buf[..n]));
    }

    assert!(collected.contains("event: connected"), "got: {collected}");
    assert!(collected.contains("event: job_started"), "got: {collected}");
    assert!(collected.contains("\"job\":42"), "got: {collected}");
}

#[tokio::test]
async fn sse_disconnect_unsubscribes_the_channel() {
    let (addr, hub) = serve(None).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /api/v1/events?channel=teardown HTTP/1.1\r\n\
              Host: localhost\r\nAccept: text/event-stream\r\n\r\n",
        )
        .await
        .unwrap();
    wait_for_subscriber(&hub, "teardown").await;

    drop(stream);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hub.subscriber_count("teardown") > 0 && tokio::time::Instant::now() < deadline {
        // Nudge the stream so the server notices the closed socket.
        hub.publish("teardown", "tick", &serde_json::json!(null));
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(
        hub.subscriber_count("teardown"),
        0,
        "a gone consumer must be unsubscribed"
    );
}

#[tokio::test]
async fn websocket_receives_hub_messages() {
    let (addr, hub) = serve(None).await;
    let (mut socket, _response) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?channel=jobs"))
            .await
            .expect("upgrade must succeed without auth configured");

    wait_for_subscriber(&hub, "jobs").await;
    hub.publish("jobs", "job_done", &serde_json::json!({"job": 7}));

    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("message should arrive")
        .unwrap()
        .unwrap();
    let text = message.into_text().unwrap();
    assert!(text.contains("job_done"), "got: {text}");
    assert!(text.contains("\"job\":7"), "got: {text}");

    socket
        .send(tokio_tungstenite::tungstenite::Message::Close(None))
        .await
        .unwrap();
}

#[tokio::test]
async fn websocket_upgrade_requires_the_configured_token() {
    let (addr, hub) = serve(Some("sesame".to_owned())).await;

    let denied = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    assert!(denied.is_err(), "upgrade without the token must be refused");

    let (mut socket, _response) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token=sesame&channel=jobs"))
            .await
            .expect("the query token must authorize browser clients");

    wait_for_subscriber(&hub, "jobs").await;
    hub.publish("jobs", "hello", &serde_json::json!(null));
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("message should arrive")
        .unwrap()
        .unwrap();
    assert!(message.into_text().unwrap().contains("hello"));
}

#[tokio::test]
async fn publish_endpoint_feeds_subscribers() {
    let (addr, hub) = serve(None).await;
    let (mut socket, _response) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?channel=deploys"))
            .await
            .unwrap();
    wait_for_subscriber(&hub, "deploys").await;

    // Publish over HTTP instead of the hub handle.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = r#"{"kind":"deploy_finished","payload":{"sha":"abc123"}}"#;
    let request = format!(
        "POST /api/v1/channels/deploys HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 202"), "got: {response}");

    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("message should arrive")
        .unwrap()
        .unwrap();
    let text = message.into_text().unwrap();
    assert!(text.contains("deploy_finished"), "got: {text}");
    assert!(text.contains("abc123"), "got: {text}");
}

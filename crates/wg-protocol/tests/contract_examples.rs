/// Contract tests for the frozen v1 wire shapes.
///
/// Each test holds a JSON document in the exact shape the worker side
/// produces or consumes, deserializes it, and checks the fields the gateway
/// relies on.  These documents are the contract; changing them is a wire
/// format change.
use wg_protocol::{HeaderValues, StreamFrame, WorkerRequest, WorkerResponse};

#[test]
fn request_shape_with_multi_valued_headers() {
    let json = r#"{
        "id": "req-8802",
        "method": "POST",
        "path": "/orders?draft=1",
        "headers": {
            "Content-Type": ["application/json"],
            "Accept-Encoding": ["gzip", "br"]
        },
        "body": "{\"sku\":\"A-100\"}"
    }"#;

    let request: WorkerRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.id, "req-8802");
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/orders?draft=1");
    assert_eq!(
        request.headers["Accept-Encoding"],
        vec!["gzip".to_owned(), "br".to_owned()],
        "value order within a header must survive"
    );

    // Serialize back and confirm the map-of-lists shape is preserved.
    let value = serde_json::to_value(&request).unwrap();
    assert!(value["headers"]["Accept-Encoding"].is_array());
    assert_eq!(value["body"], "{\"sku\":\"A-100\"}");
}

#[test]
fn request_without_headers_or_body_still_parses() {
    let request: WorkerRequest =
        serde_json::from_str(r#"{"id":"r","method":"GET","path":"/"}"#).unwrap();
    assert!(request.headers.is_empty());
    assert!(request.body.is_empty());
}

#[test]
fn buffered_response_shape() {
    let json = r#"{
        "id": "req-8802",
        "status": 201,
        "headers": {"Content-Type": "application/json", "X-Worker": "7"},
        "body": "{\"ok\":true}"
    }"#;

    let response: WorkerResponse = serde_json::from_str(json).unwrap();
    assert_eq!(response.id, "req-8802");
    assert_eq!(response.effective_status(), 201);
    assert_eq!(response.headers["X-Worker"], "7");
}

#[test]
fn buffered_response_defaults_status_to_200() {
    let response: WorkerResponse =
        serde_json::from_str(r#"{"id":"r","headers":{},"body":"hi"}"#).unwrap();
    assert_eq!(response.effective_status(), 200);
}

#[test]
fn headers_frame_with_mixed_value_shapes() {
    let json = r#"{
        "type": "headers",
        "status": 200,
        "headers": {
            "Content-Type": "text/event-stream",
            "Set-Cookie": ["a=1", "b=2"]
        },
        "data": "first bytes"
    }"#;

    let frame: StreamFrame = serde_json::from_str(json).unwrap();
    let StreamFrame::Headers {
        status,
        headers,
        data,
    } = frame
    else {
        panic!("expected headers frame");
    };
    assert_eq!(status, 200);
    assert_eq!(data.as_deref(), Some("first bytes"));
    assert_eq!(
        headers["Content-Type"],
        HeaderValues::One("text/event-stream".to_owned())
    );
    assert_eq!(headers["Set-Cookie"].as_slice().len(), 2);
}

#[test]
fn chunk_end_and_error_frames() {
    let chunk: StreamFrame = serde_json::from_str(r#"{"type":"chunk","data":"abc"}"#).unwrap();
    assert_eq!(
        chunk,
        StreamFrame::Chunk {
            data: "abc".to_owned()
        }
    );

    let end: StreamFrame = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
    assert_eq!(end, StreamFrame::End);

    let error: StreamFrame =
        serde_json::from_str(r#"{"type":"error","error":"worker fell over"}"#).unwrap();
    assert_eq!(
        error,
        StreamFrame::Error {
            error: "worker fell over".to_owned()
        }
    );
}

#[test]
fn headers_frame_without_optional_fields() {
    let frame: StreamFrame = serde_json::from_str(r#"{"type":"headers"}"#).unwrap();
    let StreamFrame::Headers {
        status,
        headers,
        data,
    } = frame
    else {
        panic!("expected headers frame");
    };
    assert_eq!(status, 0, "unset status stays zero until consumers map it");
    assert!(headers.is_empty());
    assert!(data.is_none());
}

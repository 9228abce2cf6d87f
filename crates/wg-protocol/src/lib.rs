// wg-protocol: Worker wire contract types and framing.
//
// Every message on a worker's pipes is a 4-byte big-endian length followed by
// a UTF-8 JSON payload.  Buffered exchanges carry one `WorkerRequest` and one
// `WorkerResponse`; stream exchanges carry one `WorkerRequest` followed by a
// sequence of `StreamFrame`s ending in `end` or `error`.

pub mod framing;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request header that selects the stream exchange instead of the buffered
/// one.  The worker side must reply with stream frames when it is set to "1".
pub const STREAM_REQUEST_HEADER: &str = "x-go-stream";

/// Request header carrying the caller-assigned request id.  The gateway
/// generates an id when the caller did not send one.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ---------------------------------------------------------------------------
// Buffered request/response
// ---------------------------------------------------------------------------

/// A request forwarded to a worker process.
///
/// Header values are ordered lists: a header sent twice arrives as two
/// entries under one name, in the order the client sent them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Correlation id; never empty on the wire (the gateway fills it in).
    pub id: String,
    /// Uppercase HTTP verb.
    pub method: String,
    /// Path including the query string.
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
}

/// A buffered response from a worker process.
///
/// Headers are single-valued here.  A response that needs several values for
/// one name (multiple `Set-Cookie`s in particular) must use the stream form,
/// whose `headers` frame carries value lists — the buffered shape cannot
/// express it and nothing may silently join cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    #[serde(default)]
    pub id: String,
    /// Zero means "unset" and is read as 200.
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl WorkerResponse {
    /// The HTTP status to emit: a zero status reads as 200.
    pub fn effective_status(&self) -> u16 {
        if self.status == 0 { 200 } else { self.status }
    }
}

// ---------------------------------------------------------------------------
// Stream frames
// ---------------------------------------------------------------------------

/// One or many values for a response header in a `headers` stream frame.
///
/// The worker side may send `"X-A": "v"` or `"X-A": ["v1", "v2"]`; both
/// shapes deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    pub fn as_slice(&self) -> &[String] {
        match self {
            HeaderValues::One(value) => std::slice::from_ref(value),
            HeaderValues::Many(values) => values,
        }
    }
}

/// A frame of an incremental response.
///
/// At most one `headers` frame opens a stream; `chunk` frames append body
/// bytes; the stream terminates on the first `end` or `error`.  There is no
/// catch-all variant: an unknown `type` tag must fail deserialization so the
/// exchange aborts instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Headers {
        /// Zero means "unset" and is read as 200.
        #[serde(default)]
        status: u16,
        #[serde(default)]
        headers: HashMap<String, HeaderValues>,
        /// Optional inline first body chunk.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    Chunk {
        data: String,
    },
    End,
    Error {
        error: String,
    },
}

//! One interpreter child process and its framed request exchange.
//!
//! A `Worker` owns a child for the child's whole lifetime: both pipes, the
//! liveness flag, and the served-request budget.  All pipe I/O happens under
//! the worker's mutex so request/response pairs never interleave on one
//! child.  `mark_dead` only flips the flag — the next dispatch observes it
//! and respawns lazily.
//!
//! # Exchange modes
//! - Buffered: one request frame out, one response frame in.
//! - Stream: one request frame out, then `headers`/`chunk`/`end`/`error`
//!   frames in, translated to [`StreamEvent`]s on a channel.
//!
//! Both modes sit under the per-request timeout; a timeout kills and reaps
//! the child before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use wg_protocol::framing::{self, FrameError};
use wg_protocol::{HeaderValues, StreamFrame, WorkerRequest, WorkerResponse};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How to launch a worker child and how long to let it live.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interpreter executable, e.g. `"php"`.
    pub command: String,
    /// Script handed to the interpreter as its first argument.
    pub entrypoint: String,
    /// Manifest file that marks the project base directory,
    /// e.g. `"composer.json"`.
    pub marker: String,
    /// Where the base-directory search starts.
    pub project_root: PathBuf,
    /// Requests served before the child is recycled.
    pub max_requests: u64,
    /// Per-request deadline; on expiry the child is killed and reaped.
    pub request_timeout: Duration,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("worker pipe: {0}")]
    Pipe(#[from] FrameError),
    #[error("worker did not reply within the request timeout")]
    Timeout,
    #[error("worker payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("worker protocol: {0}")]
    Protocol(String),
    #[error("worker stream failed: {0}")]
    Stream(String),
}

impl WorkerError {
    /// True when the child went away mid-exchange (EOF, broken pipe, reset).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, WorkerError::Pipe(frame) if frame.is_disconnect())
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Translated form of a worker's stream frames, ready for a response writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Opens the response.  Header pairs preserve duplicates, so
    /// cookie-style headers arrive as distinct entries.
    Start {
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// One body chunk; the writer should flush after each.
    Data(Vec<u8>),
    /// Clean end of the body.
    End,
    /// The worker reported a stream error; the response is broken off.
    Fail(String),
}

// ---------------------------------------------------------------------------
// Child process handle
// ---------------------------------------------------------------------------

/// The spawned child plus its two pipes.  Lives inside the worker mutex.
struct ChildIo {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ChildIo {
    async fn spawn(cfg: &WorkerConfig) -> Result<Self, WorkerError> {
        let base_dir = locate_base_dir(&cfg.project_root, &cfg.marker);
        let mut child = Command::new(&cfg.command)
            .arg(&cfg.entrypoint)
            .current_dir(&base_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(WorkerError::Spawn)?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        debug!(
            command = %cfg.command,
            base_dir = %base_dir.display(),
            pid = child.id(),
            "worker process spawned"
        );
        Ok(ChildIo {
            child,
            stdin,
            stdout,
        })
    }

    /// Close both pipes, kill the child, and wait so it is reaped.
    async fn shutdown(self) {
        let ChildIo {
            mut child,
            stdin,
            stdout,
        } = self;
        drop(stdin);
        drop(stdout);
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Walk up from `root` to the nearest ancestor containing `marker`.
/// Falls back to `root` itself when no ancestor carries the marker.
fn locate_base_dir(root: &Path, marker: &str) -> PathBuf {
    let mut dir = root;
    loop {
        if dir.join(marker).is_file() {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return root.to_path_buf(),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A single long-lived worker child with serialized request handling.
pub struct Worker {
    cfg: Arc<WorkerConfig>,
    io: Mutex<Option<ChildIo>>,
    dead: AtomicBool,
    served: AtomicU64,
}

impl Worker {
    /// Create an unspawned worker.  The child starts on the first dispatch.
    pub fn new(cfg: Arc<WorkerConfig>) -> Self {
        Worker {
            cfg,
            io: Mutex::new(None),
            dead: AtomicBool::new(false),
            served: AtomicU64::new(0),
        }
    }

    /// Flag the worker for recycling.  Never kills the process directly; the
    /// next `handle`/`stream` observes the flag and restarts.
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Buffered exchange: write the request frame, read one response frame.
    ///
    /// Retries exactly once when the child went away mid-exchange.  A timeout
    /// kills and reaps the child, marks the worker dead, and is never
    /// retried.
    pub async fn handle(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let mut io = self.io.lock().await;
        let mut retried = false;
        loop {
            self.ensure_live(&mut io).await?;
            let conn = io.as_mut().expect("live child after ensure_live");
            let exchange = buffered_exchange(&mut conn.stdin, &mut conn.stdout, request);
            match tokio::time::timeout(self.cfg.request_timeout, exchange).await {
                Ok(Ok(response)) => {
                    self.note_served();
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    self.mark_dead();
                    if err.is_disconnect() && !retried {
                        debug!(error = %err, "worker pipe broke, retrying once on a fresh child");
                        retried = true;
                        continue;
                    }
                    return Err(err);
                }
                Err(_elapsed) => {
                    self.mark_dead();
                    if let Some(stale) = io.take() {
                        stale.shutdown().await;
                    }
                    return Err(WorkerError::Timeout);
                }
            }
        }
    }

    /// Stream exchange: write the request frame, then translate stream frames
    /// onto `events` until `end` or `error`.
    ///
    /// No retry — bytes may already have reached the sink.  The worker mutex
    /// is held for the whole stream so nothing else multiplexes onto the
    /// child; the timeout wraps the entire exchange.
    pub async fn stream(
        &self,
        request: &WorkerRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), WorkerError> {
        let mut io = self.io.lock().await;
        self.ensure_live(&mut io).await?;
        let conn = io.as_mut().expect("live child after ensure_live");
        let exchange = stream_exchange(&mut conn.stdin, &mut conn.stdout, request, events);
        match tokio::time::timeout(self.cfg.request_timeout, exchange).await {
            Ok(Ok(())) => {
                self.note_served();
                Ok(())
            }
            Ok(Err(err)) => {
                match &err {
                    // The worker finished its exchange with an error frame;
                    // the pipe is still consistent.
                    WorkerError::Stream(_) => self.note_served(),
                    _ => self.mark_dead(),
                }
                Err(err)
            }
            Err(_elapsed) => {
                self.mark_dead();
                if let Some(stale) = io.take() {
                    stale.shutdown().await;
                }
                Err(WorkerError::Timeout)
            }
        }
    }

    /// Respawn when there is no child or the worker is flagged dead.
    /// A flagged child is killed and reaped before the fresh spawn.
    async fn ensure_live(&self, io: &mut Option<ChildIo>) -> Result<(), WorkerError> {
        if io.is_some() && !self.is_dead() {
            return Ok(());
        }
        if let Some(stale) = io.take() {
            stale.shutdown().await;
        }
        match ChildIo::spawn(&self.cfg).await {
            Ok(fresh) => {
                *io = Some(fresh);
                self.dead.store(false, Ordering::SeqCst);
                self.served.store(0, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                // Stay dead so the pool keeps reporting this worker down;
                // the next dispatch attempts another spawn.
                self.mark_dead();
                Err(err)
            }
        }
    }

    fn note_served(&self) {
        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        if served >= self.cfg.max_requests {
            debug!(served, "request budget exhausted, worker flagged for recycle");
            self.mark_dead();
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange loops (generic over the pipes for in-memory tests)
// ---------------------------------------------------------------------------

pub(crate) async fn buffered_exchange<W, R>(
    stdin: &mut W,
    stdout: &mut R,
    request: &WorkerRequest,
) -> Result<WorkerResponse, WorkerError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let payload = serde_json::to_vec(request)?;
    framing::write_frame(stdin, &payload).await?;
    let raw = framing::read_frame(stdout).await?;
    let response: WorkerResponse = serde_json::from_slice(&raw)?;
    Ok(response)
}

pub(crate) async fn stream_exchange<W, R>(
    stdin: &mut W,
    stdout: &mut R,
    request: &WorkerRequest,
    events: &mpsc::Sender<StreamEvent>,
) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let payload = serde_json::to_vec(request)?;
    framing::write_frame(stdin, &payload).await?;

    let mut started = false;
    // When the consumer goes away mid-stream we keep draining frames so the
    // child finishes its exchange and the pipe stays request-aligned.
    let mut delivering = true;
    loop {
        let raw = framing::read_frame(stdout).await?;
        let frame: StreamFrame = serde_json::from_slice(&raw)?;
        match frame {
            StreamFrame::Headers {
                status,
                headers,
                data,
            } => {
                if started {
                    return Err(WorkerError::Protocol(
                        "second headers frame in one stream".to_owned(),
                    ));
                }
                started = true;
                let status = if status == 0 { 200 } else { status };
                let headers = flatten_stream_headers(&headers);
                deliver(events, StreamEvent::Start { status, headers }, &mut delivering).await;
                if let Some(data) = data {
                    if !data.is_empty() {
                        deliver(events, StreamEvent::Data(data.into_bytes()), &mut delivering)
                            .await;
                    }
                }
            }
            StreamFrame::Chunk { data } => {
                if !started {
                    started = true;
                    deliver(
                        events,
                        StreamEvent::Start {
                            status: 200,
                            headers: Vec::new(),
                        },
                        &mut delivering,
                    )
                    .await;
                }
                deliver(events, StreamEvent::Data(data.into_bytes()), &mut delivering).await;
            }
            StreamFrame::End => {
                if !started {
                    deliver(
                        events,
                        StreamEvent::Start {
                            status: 200,
                            headers: Vec::new(),
                        },
                        &mut delivering,
                    )
                    .await;
                }
                deliver(events, StreamEvent::End, &mut delivering).await;
                return Ok(());
            }
            StreamFrame::Error { error } => {
                deliver(events, StreamEvent::Fail(error.clone()), &mut delivering).await;
                return Err(WorkerError::Stream(error));
            }
        }
    }
}

async fn deliver(events: &mpsc::Sender<StreamEvent>, event: StreamEvent, delivering: &mut bool) {
    if !*delivering {
        return;
    }
    if events.send(event).await.is_err() {
        warn!("stream consumer went away, draining remaining frames");
        *delivering = false;
    }
}

/// Flatten a `headers` frame's name → values map into response header pairs.
///
/// Empty value lists are skipped.  Cookie-style headers keep one pair per
/// value; everything else multi-valued joins with `", "`.
fn flatten_stream_headers(headers: &HashMap<String, HeaderValues>) -> Vec<(String, String)> {
    let mut flat = Vec::new();
    for (name, values) in headers {
        let values = values.as_slice();
        if values.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case("set-cookie") {
            for value in values {
                flat.push((name.clone(), value.clone()));
            }
        } else if values.len() == 1 {
            flat.push((name.clone(), values[0].clone()));
        } else {
            flat.push((name.clone(), values.join(", ")));
        }
    }
    flat
}

// worker-stub: a scriptable worker-side implementation of the wire protocol.
//
// Reads request frames from stdin and answers on stdout, keyed on the
// request path.  The integration tests drive every lifecycle edge through
// this binary; it also doubles as a reference for what a real interpreter
// worker must speak.
//
// Paths:
//   /hang         never reply (exercises the request timeout)
//   /die          exit without replying (broken pipe mid-request)
//   /last         reply normally, then exit (broken pipe on the NEXT request)
//   /sleep?ms=N   reply after N milliseconds
//   /stream       headers frame + two chunks + end
//   /cookies      headers frame with multi-valued headers + end
//   /bare-chunk   chunk + end with no headers frame
//   /boom         error frame
//   anything else buffered echo of method/path/body

use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncWrite, Stdout};
use wg_protocol::framing;
use wg_protocol::{HeaderValues, StreamFrame, WorkerRequest, WorkerResponse};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    loop {
        let raw = match framing::read_frame(&mut stdin).await {
            Ok(raw) => raw,
            // The gateway closed our stdin: normal recycle.
            Err(err) if err.is_disconnect() => break,
            Err(err) => {
                eprintln!("worker-stub: bad frame: {err}");
                break;
            }
        };
        let request: WorkerRequest = match serde_json::from_slice(&raw) {
            Ok(request) => request,
            Err(err) => {
                eprintln!("worker-stub: bad request payload: {err}");
                break;
            }
        };
        if !serve(&mut stdout, &request).await {
            break;
        }
    }
}

/// Handle one request; false ends the process loop.
async fn serve(stdout: &mut Stdout, request: &WorkerRequest) -> bool {
    let path = request.path.split('?').next().unwrap_or(&request.path);
    match path {
        "/hang" => {
            // Hold the exchange open forever; the gateway's timeout kills us.
            std::future::pending::<()>().await;
            true
        }
        "/die" => false,
        "/last" => {
            write_response(stdout, echo(request)).await;
            false
        }
        "/boom" => {
            write_stream_frame(
                stdout,
                &StreamFrame::Error {
                    error: "boom".to_owned(),
                },
            )
            .await;
            true
        }
        "/stream" => {
            write_stream_frame(
                stdout,
                &StreamFrame::Headers {
                    status: 200,
                    headers: HashMap::from([(
                        "X-Stream".to_owned(),
                        HeaderValues::One("1".to_owned()),
                    )]),
                    data: None,
                },
            )
            .await;
            write_stream_frame(
                stdout,
                &StreamFrame::Chunk {
                    data: "hello ".to_owned(),
                },
            )
            .await;
            write_stream_frame(
                stdout,
                &StreamFrame::Chunk {
                    data: "world".to_owned(),
                },
            )
            .await;
            write_stream_frame(stdout, &StreamFrame::End).await;
            true
        }
        "/cookies" => {
            write_stream_frame(
                stdout,
                &StreamFrame::Headers {
                    status: 200,
                    headers: HashMap::from([
                        (
                            "X-Test".to_owned(),
                            HeaderValues::Many(vec!["one".to_owned(), "two".to_owned()]),
                        ),
                        (
                            "Set-Cookie".to_owned(),
                            HeaderValues::Many(vec!["a=1".to_owned(), "b=2".to_owned()]),
                        ),
                    ]),
                    data: None,
                },
            )
            .await;
            write_stream_frame(stdout, &StreamFrame::End).await;
            true
        }
        "/bare-chunk" => {
            write_stream_frame(
                stdout,
                &StreamFrame::Chunk {
                    data: "x".to_owned(),
                },
            )
            .await;
            write_stream_frame(stdout, &StreamFrame::End).await;
            true
        }
        "/sleep" => {
            let ms = request
                .path
                .split_once("ms=")
                .and_then(|(_, ms)| ms.parse::<u64>().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            write_response(stdout, echo(request)).await;
            true
        }
        _ => {
            write_response(stdout, echo(request)).await;
            true
        }
    }
}

fn echo(request: &WorkerRequest) -> WorkerResponse {
    WorkerResponse {
        id: request.id.clone(),
        status: 200,
        headers: HashMap::from([
            ("X-Echo-Method".to_owned(), request.method.clone()),
            ("X-Echo-Path".to_owned(), request.path.clone()),
            ("X-Worker-Pid".to_owned(), std::process::id().to_string()),
        ]),
        body: if request.body.is_empty() {
            request.path.clone()
        } else {
            request.body.clone()
        },
    }
}

async fn write_response<W: AsyncWrite + Unpin>(stdout: &mut W, response: WorkerResponse) {
    let payload = serde_json::to_vec(&response).expect("response serializes");
    if let Err(err) = framing::write_frame(stdout, &payload).await {
        eprintln!("worker-stub: write failed: {err}");
    }
}

async fn write_stream_frame<W: AsyncWrite + Unpin>(stdout: &mut W, frame: &StreamFrame) {
    let payload = serde_json::to_vec(frame).expect("frame serializes");
    if let Err(err) = framing::write_frame(stdout, &payload).await {
        eprintln!("worker-stub: write failed: {err}");
    }
}

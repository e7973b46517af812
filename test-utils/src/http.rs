//! Minimal HTTP/1.1 server serving one payload at every path.
//!
//! Each connection handles one request and closes. Behaviour knobs let a
//! test simulate a mirror that drops connections, ignores ranges, serves
//! corrupt data or is down entirely.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How long a stalled connection stays silent.
const STALL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default)]
pub struct ServerBehavior {
    /// Answer 500 to every request.
    pub fail_all: bool,
    /// Serve 200 with the full body even when a range is requested.
    pub ignore_ranges: bool,
    /// Close the first `n` GET connections after this many body bytes.
    pub drop_after: Option<(usize, usize)>,
    /// Flip the byte at this offset in every response.
    pub corrupt_at: Option<usize>,
    /// Answer ranged requests with 416.
    pub reject_ranges: bool,
    /// Accept GET requests but never send response headers. HEAD is
    /// answered normally.
    pub stall_before_headers: bool,
}

/// A request as the server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub range_start: Option<u64>,
}

struct State {
    body: Vec<u8>,
    behavior: Mutex<ServerBehavior>,
    gets: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
}

pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start(body: Vec<u8>, behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture server");
        let addr = listener.local_addr().expect("fixture server address");
        let state = Arc::new(State {
            body,
            behavior: Mutex::new(behavior),
            gets: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &state).await;
                });
            }
        });

        Self { addr, state, task }
    }

    /// URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn set_behavior(&self, behavior: ServerBehavior) {
        *self.state.behavior.lock() = behavior;
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.seen.lock().clone()
    }

    /// GET requests served so far.
    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: &State) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut range_start = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("range")
        {
            range_start = value
                .trim()
                .strip_prefix("bytes=")
                .and_then(|v| v.trim_end_matches('-').parse::<u64>().ok());
        }
    }
    state.seen.lock().push(SeenRequest {
        method: method.clone(),
        path,
        range_start,
    });

    let behavior = state.behavior.lock().clone();
    let mut stream = reader.into_inner();

    if behavior.fail_all {
        stream
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
        return stream.shutdown().await;
    }

    let total = state.body.len();
    let head_only = method == "HEAD";
    let ordinal = if head_only {
        0
    } else {
        state.gets.fetch_add(1, Ordering::SeqCst) + 1
    };

    if behavior.stall_before_headers && !head_only {
        tokio::time::sleep(STALL).await;
        return Ok(());
    }

    let start = match range_start {
        Some(_) if behavior.reject_ranges => {
            let header = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                total
            );
            stream.write_all(header.as_bytes()).await?;
            return stream.shutdown().await;
        }
        Some(start) if !behavior.ignore_ranges && (start as usize) < total => start as usize,
        _ => 0,
    };

    let mut body = state.body[start..].to_vec();
    if let Some(at) = behavior.corrupt_at
        && at >= start
        && at < total
    {
        body[at - start] ^= 0xFF;
    }

    let header = if start > 0 {
        format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            body.len(),
            start,
            total - 1,
            total
        )
    } else {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            body.len()
        )
    };
    stream.write_all(header.as_bytes()).await?;
    if head_only {
        return stream.shutdown().await;
    }

    match behavior.drop_after {
        Some((connections, bytes)) if ordinal <= connections => {
            let cut = bytes.min(body.len());
            stream.write_all(&body[..cut]).await?;
            stream.flush().await?;
            // Abrupt close mid-body
            drop(stream);
            Ok(())
        }
        _ => {
            stream.write_all(&body).await?;
            stream.shutdown().await
        }
    }
}

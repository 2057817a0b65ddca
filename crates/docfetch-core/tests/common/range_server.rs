//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves one static body on every path. Honors `Range: bytes=N-` and
//! `If-Range` against its ETag, answers 416 with `bytes */N` past the end,
//! and can be told to fail, stall, misreport lengths or stream slowly. Every
//! request is recorded so tests can assert on what the client sent.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// Validator sent as `ETag` and compared against `If-Range`.
    pub etag: Option<String>,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Answer every request with this status and an empty body.
    pub fixed_status: Option<u16>,
    /// Answer the first N requests with 500.
    pub fail_first: usize,
    /// Stream the body in pieces of this size with a pause after each.
    pub throttle: Option<(usize, Duration)>,
    /// Hold the first N requests this long before answering.
    pub stall_first: Option<(usize, Duration)>,
    /// Partial responses to the first N requests claim a total 1 KiB larger
    /// than the body.
    pub misreport_total_first: usize,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            etag: Some("\"v1\"".to_string()),
            support_ranges: true,
            fixed_status: None,
            fail_first: 0,
            throttle: None,
            stall_first: None,
            misreport_total_first: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Handle to a running server. The server thread lives until the process exits.
#[derive(Clone)]
pub struct RangeServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RangeServer {
    /// `base_url` joined with `name`, e.g. `http://127.0.0.1:1234/a.pdf`.
    pub fn url(&self, name: &str) -> String {
        format!("{}{}", self.base_url, name)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let served = Arc::new(AtomicUsize::new(0));
    {
        let requests = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let body = Arc::clone(&body);
                let opts = Arc::clone(&opts);
                let requests = Arc::clone(&requests);
                let served = Arc::clone(&served);
                thread::spawn(move || handle(stream, &body, &opts, &requests, &served));
            }
        });
    }
    RangeServer {
        base_url: format!("http://127.0.0.1:{}/", port),
        requests,
    }
}

fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
        if data.len() > 64 * 1024 {
            return None;
        }
    }
    String::from_utf8(data).ok()
}

fn parse_request(raw: &str) -> RecordedRequest {
    let mut lines = raw.split("\r\n");
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_string();
    let path = first.next().unwrap_or("/").to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();
    RecordedRequest {
        method,
        path,
        headers,
        at: Instant::now(),
    }
}

/// Start offset from `Range: bytes=N-` (or `bytes=N-M`).
fn range_start(req: &RecordedRequest) -> Option<u64> {
    let value = req.header("range")?;
    let ranges = value.trim().strip_prefix("bytes=")?;
    let (start, _) = ranges.split_once('-')?;
    start.trim().parse().ok()
}

fn write_head(stream: &mut TcpStream, status: &str, headers: &[(String, String)], len: usize) -> bool {
    let mut head = format!("HTTP/1.1 {status}\r\nContent-Length: {len}\r\nConnection: close\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).is_ok()
}

fn handle(
    mut stream: TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    requests: &Mutex<Vec<RecordedRequest>>,
    served: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(raw) = read_head(&mut stream) else {
        return;
    };
    let req = parse_request(&raw);
    requests.lock().unwrap().push(req.clone());
    let n = served.fetch_add(1, Ordering::SeqCst);

    if let Some((count, pause)) = opts.stall_first {
        if n < count {
            thread::sleep(pause);
        }
    }
    if let Some(status) = opts.fixed_status {
        let _ = write_head(&mut stream, &format!("{status} Test"), &[], 0);
        return;
    }
    if n < opts.fail_first {
        let _ = write_head(&mut stream, "500 Internal Server Error", &[], 0);
        return;
    }
    if !req.method.eq_ignore_ascii_case("GET") {
        let _ = write_head(&mut stream, "405 Method Not Allowed", &[], 0);
        return;
    }

    let total = body.len() as u64;
    let mut headers = Vec::new();
    if let Some(etag) = &opts.etag {
        headers.push(("ETag".to_string(), etag.clone()));
    }
    let validator_matches = match req.header("if-range") {
        Some(sent) => opts.etag.as_deref() == Some(sent),
        None => true,
    };
    let start = range_start(&req).filter(|_| opts.support_ranges && validator_matches);

    let (status, slice) = match start {
        Some(start) if start >= total => {
            headers.push(("Content-Range".to_string(), format!("bytes */{total}")));
            ("416 Range Not Satisfiable", &body[0..0])
        }
        Some(start) => {
            let claimed = if n < opts.misreport_total_first {
                total + 1024
            } else {
                total
            };
            headers.push((
                "Content-Range".to_string(),
                format!("bytes {}-{}/{}", start, total - 1, claimed),
            ));
            ("206 Partial Content", &body[start as usize..])
        }
        None => ("200 OK", body),
    };
    if !write_head(&mut stream, status, &headers, slice.len()) {
        return;
    }
    match opts.throttle {
        Some((piece, pause)) => {
            for chunk in slice.chunks(piece.max(1)) {
                if stream.write_all(chunk).is_err() {
                    return;
                }
                let _ = stream.flush();
                thread::sleep(pause);
            }
        }
        None => {
            let _ = stream.write_all(slice);
        }
    }
}

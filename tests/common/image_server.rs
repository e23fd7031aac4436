//! Minimal HTTP/1.1 server for integration tests.
//!
//! Routes by path:
//! - `/status/<code>/...` answers with that status.
//! - `/truncated/...` promises more bytes than it sends, then hangs up.
//! - `/empty/...` answers 200 with an empty body.
//! - `/flaky/<n>/...` hangs up without answering the first `n` requests for
//!   that exact path, then serves it normally.
//! - `/reset/...` always hangs up without answering.
//! - anything else answers 200 with [`body_for`] of the path.
//!
//! Every request is held for the configured delay before answering, and the
//! server tracks how many requests it was handling at once.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: AtomicUsize,
    hits: Mutex<HashMap<String, usize>>,
}

pub struct ImageServer {
    base: String,
    counters: Arc<Counters>,
}

impl ImageServer {
    pub fn start() -> Self {
        Self::start_with_delay(Duration::ZERO)
    }

    /// Starts a server on a background thread; it runs until the process exits.
    pub fn start_with_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let counters = Arc::new(Counters::default());
        let server_counters = Arc::clone(&counters);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let counters = Arc::clone(&server_counters);
                thread::spawn(move || handle(stream, delay, &counters));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}/", port),
            counters,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    /// Most requests handled at the same time.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Requests received for one exact path.
    pub fn hits(&self, path: &str) -> usize {
        let hits = self.counters.hits.lock().unwrap();
        hits.get(path).copied().unwrap_or(0)
    }
}

/// The body served for an ordinary path.
pub fn body_for(path: &str) -> Vec<u8> {
    format!("image-bytes:{}", path).into_bytes()
}

fn handle(mut stream: TcpStream, delay: Duration, counters: &Counters) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    counters.requests.fetch_add(1, Ordering::SeqCst);
    let hit = {
        let mut hits = counters.hits.lock().unwrap();
        let count = hits.entry(path.clone()).or_insert(0);
        *count += 1;
        *count
    };
    let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak.fetch_max(now, Ordering::SeqCst);

    if !delay.is_zero() {
        thread::sleep(delay);
    }
    if hangs_up(&path, hit) {
        // Dropping the stream closes it before any response bytes.
        drop(stream);
    } else {
        respond(&mut stream, &path);
    }

    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
}

fn hangs_up(path: &str, hit: usize) -> bool {
    if path.starts_with("/reset/") {
        return true;
    }
    match path.strip_prefix("/flaky/") {
        Some(rest) => {
            let failures: usize = rest.split('/').next().and_then(|n| n.parse().ok()).unwrap_or(0);
            hit <= failures
        }
        None => false,
    }
}

fn respond(stream: &mut TcpStream, path: &str) {
    if let Some(rest) = path.strip_prefix("/status/") {
        let code: u16 = rest.split('/').next().and_then(|c| c.parse().ok()).unwrap_or(500);
        let body = b"nope";
        let head = format!(
            "HTTP/1.1 {} Status\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            code,
            body.len()
        );
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(body);
        return;
    }

    if path.starts_with("/truncated/") {
        let head = "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n";
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(&[0xFFu8; 100]);
        let _ = stream.flush();
        let _ = stream.shutdown(std::net::Shutdown::Both);
        return;
    }

    let body = if path.starts_with("/empty/") {
        Vec::new()
    } else {
        body_for(path)
    };
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&body);
}

#![cfg(feature = "hyper-transport")]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fetch_rate_limit::prelude::{
    DispatchTable, Error, ErrorCode, Executor, ExecutorConfig, HyperTransport, MemoryCache,
    RequestOptions, TransportErrorKind,
};

#[derive(Clone)]
struct ResponseSpec {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl ResponseSpec {
    fn new(status: u16, headers: &[(&str, &str)], body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
                .collect(),
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_content_length(raw_headers: &[u8]) -> usize {
    let text = String::from_utf8_lossy(raw_headers);
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
            && let Ok(parsed) = value.trim().parse::<usize>()
        {
            return parsed;
        }
    }
    0
}

fn read_http_message(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);

        if let Some(header_end) = find_header_end(&raw) {
            let content_length = parse_content_length(&raw[..header_end]);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }

    Ok(raw)
}

fn write_http_response(stream: &mut TcpStream, response: &ResponseSpec) -> std::io::Result<()> {
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        response.body.len()
    )
    .into_bytes();

    for (name, value) in &response.headers {
        raw.extend_from_slice(name.as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"\r\n");
    raw.extend_from_slice(&response.body);

    stream.write_all(&raw)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        304 => "Not Modified",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Serves `responses` in order, one connection each, recording raw requests.
struct ScriptedServer {
    authority: String,
    requests: Arc<Mutex<Vec<String>>>,
    join: Option<JoinHandle<()>>,
}

impl ScriptedServer {
    fn start(responses: Vec<ResponseSpec>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind scripted server");
        let authority = listener
            .local_addr()
            .expect("read local address")
            .to_string();
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_clone = Arc::clone(&requests);
        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut pending = responses.into_iter();
            let mut next = pending.next();

            while let Some(response) = next.take() {
                if Instant::now() >= deadline {
                    break;
                }
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(raw) = read_http_message(&mut stream) {
                            lock_unpoisoned(&requests_clone)
                                .push(String::from_utf8_lossy(&raw).into_owned());
                        }
                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }
                        let _ = write_http_response(&mut stream, &response);
                        next = pending.next();
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                        next = Some(response);
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            authority,
            requests,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.authority, path)
    }

    fn requests(&self) -> Vec<String> {
        lock_unpoisoned(&self.requests).clone()
    }

    fn finish(mut self) -> Vec<String> {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.requests()
    }
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry_schedule_ms: vec![10, 20, 30],
        slow_retry_schedule_ms: vec![10, 20, 30],
        min_wait_ms: 50,
        ..ExecutorConfig::default()
    }
}

#[tokio::test]
async fn retries_service_unavailable_over_real_sockets() {
    let server = ScriptedServer::start(vec![
        ResponseSpec::new(503, &[], "busy"),
        ResponseSpec::new(200, &[("content-type", "application/json")], r#"{"ok":true}"#),
    ]);
    let executor = Executor::builder(HyperTransport::new())
        .config(fast_config())
        .build();

    let response = executor
        .fetch(server.url("/status"), RequestOptions::new())
        .await
        .expect("second attempt succeeds");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.body().as_ref(), br#"{"ok":true}"#);
    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].starts_with("GET /status HTTP/1.1"));
}

#[tokio::test]
async fn zero_retry_after_is_terminal() {
    let server = ScriptedServer::start(vec![ResponseSpec::new(
        429,
        &[("retry-after", "0")],
        "",
    )]);
    let executor = Executor::builder(HyperTransport::new())
        .config(fast_config())
        .build();

    let response = executor
        .fetch(server.url("/limited"), RequestOptions::new())
        .await
        .expect("429 is not an error");

    assert_eq!(response.status().as_u16(), 429);
    assert_eq!(server.finish().len(), 1);
}

#[tokio::test]
async fn unparsable_reset_waits_the_minimum() {
    let server = ScriptedServer::start(vec![
        ResponseSpec::new(429, &[("x-ratelimit-reset", "not-a-number")], ""),
        ResponseSpec::new(200, &[], "done"),
    ]);
    let executor = Executor::builder(HyperTransport::new())
        .config(fast_config())
        .build();
    let started = Instant::now();

    let response = executor
        .fetch(server.url("/limited"), RequestOptions::new())
        .await
        .expect("rate limit clears");

    assert_eq!(response.body().as_ref(), b"done");
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(executor.metrics_snapshot().rate_limit_waits, 1);
    assert_eq!(server.finish().len(), 2);
}

#[tokio::test]
async fn relative_redirect_reaches_the_new_path() {
    let server = ScriptedServer::start(vec![
        ResponseSpec::new(301, &[("location", "/moved?page=2")], ""),
        ResponseSpec::new(200, &[], "here"),
    ]);
    let executor = Executor::builder(HyperTransport::new())
        .config(fast_config())
        .build();

    let response = executor
        .fetch(server.url("/old"), RequestOptions::new())
        .await
        .expect("redirect is followed");

    assert_eq!(response.body().as_ref(), b"here");
    assert_eq!(response.url(), server.url("/moved?page=2"));
    let requests = server.finish();
    assert!(requests[1].starts_with("GET /moved?page=2 HTTP/1.1"));
}

#[tokio::test]
async fn not_modified_is_served_from_cache_over_real_sockets() {
    let server = ScriptedServer::start(vec![
        ResponseSpec::new(200, &[("etag", "\"abc\"")], "fresh"),
        ResponseSpec::new(304, &[("etag", "\"abc\"")], ""),
    ]);
    let executor = Executor::builder(HyperTransport::new())
        .config(fast_config())
        .cache(Arc::new(MemoryCache::default()))
        .build();

    let first = executor
        .fetch(server.url("/doc"), RequestOptions::new())
        .await
        .expect("first call succeeds");
    let second = executor
        .fetch(server.url("/doc"), RequestOptions::new())
        .await
        .expect("second call succeeds");

    assert_eq!(first.body(), second.body());
    assert_eq!(second.status().as_u16(), 200);
    let requests = server.finish();
    assert!(
        requests[1]
            .to_ascii_lowercase()
            .contains("if-none-match: \"abc\"")
    );
}

#[tokio::test]
async fn refused_connection_without_policy_is_rethrown() {
    let authority = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
        listener
            .local_addr()
            .expect("read local address")
            .to_string()
    };
    let executor = Executor::builder(HyperTransport::new())
        .dispatch_table(Arc::new(DispatchTable::builder().build()))
        .build();

    let error = executor
        .fetch(format!("http://{authority}/"), RequestOptions::new())
        .await
        .expect_err("nothing listens on the port");

    match error {
        Error::Transport(error) => assert_eq!(error.kind(), TransportErrorKind::Connect),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn slow_server_times_out_per_attempt() {
    let server = ScriptedServer::start(vec![
        ResponseSpec::new(200, &[], "late").delayed(Duration::from_millis(500)),
        ResponseSpec::new(200, &[], "late").delayed(Duration::from_millis(500)),
    ]);
    let executor = Executor::builder(
        HyperTransport::new().request_timeout(Duration::from_millis(100)),
    )
    .config(fast_config())
    .max_retries(2)
    .build();

    let error = executor
        .fetch(server.url("/slow"), RequestOptions::new())
        .await
        .expect_err("every attempt times out");

    assert_eq!(error.code(), ErrorCode::MaxRetriesReached);
    let snapshot = executor.metrics_snapshot();
    assert_eq!(snapshot.transport_errors, 2);
    assert_eq!(snapshot.error_counts.get("transport:timeout"), Some(&2));
}

#[tokio::test]
async fn https_url_fails_fast_on_the_plain_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let authority = listener
        .local_addr()
        .expect("read local address")
        .to_string();
    let executor = Executor::builder(HyperTransport::new()).build();
    let started = Instant::now();

    let error = executor
        .fetch(format!("https://{authority}/"), RequestOptions::new())
        .await
        .expect_err("https is not supported");

    match error {
        Error::Transport(error) => assert_eq!(error.kind(), TransportErrorKind::Other),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(executor.metrics_snapshot().attempts, 1);
    assert!(started.elapsed() < Duration::from_millis(300));
}

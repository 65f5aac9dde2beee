//! Scripted in-memory transport for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;

use super::error::TransportError;
use super::request::ApiRequest;
use super::response::ApiResponse;
use super::transport::Transport;

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bearer token carried by a request, if any
pub fn bearer(request: &ApiRequest) -> Option<String> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub fn refresh_body(token: &str) -> String {
    serde_json::json!({
        "data": {
            "access_token": token,
            "user": {"id": "u1", "email": "shopper@example.com", "name": "Shopper", "role": "customer"}
        }
    })
    .to_string()
}

/// Answers requests per path and records everything it was sent.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Handler>>,
    delays: Mutex<HashMap<String, Duration>>,
    recorded: Mutex<Vec<ApiRequest>>,
    remembered: Mutex<Vec<String>>,
    cookies: Mutex<Option<String>>,
    restored: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(&self, path: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        lock(&self.routes).insert(path.to_string(), Box::new(handler));
    }

    pub fn respond(&self, path: &str, status: StatusCode, body: &str) {
        let body = body.to_string();
        self.route(path, move |_| Ok(ApiResponse::new(status, body.clone())));
    }

    /// 200 with `body` when the request carries `token`, 401 otherwise
    pub fn respond_authorized(&self, path: &str, token: &str, body: &str) {
        let token = token.to_string();
        let body = body.to_string();
        self.route(path, move |request| {
            if bearer(request).as_deref() == Some(token.as_str()) {
                Ok(ApiResponse::new(StatusCode::OK, body.clone()))
            } else {
                Ok(ApiResponse::new(
                    StatusCode::UNAUTHORIZED,
                    r#"{"apiError": {"message": "Token expired"}}"#,
                ))
            }
        });
    }

    pub fn respond_refresh_ok(&self, token: &str) {
        self.respond("/auth/refresh-token", StatusCode::OK, &refresh_body(token));
    }

    pub fn fail(&self, path: &str, message: &str) {
        let message = message.to_string();
        self.route(path, move |_| Err(TransportError::Connection(message.clone())));
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        lock(&self.delays).insert(path.to_string(), delay);
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        lock(&self.recorded)
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn remembered_tokens(&self) -> Vec<String> {
        lock(&self.remembered).clone()
    }

    /// What `cookies_for` reports from now on
    pub fn set_cookies(&self, cookies: &str) {
        *lock(&self.cookies) = Some(cookies.to_string());
    }

    pub fn restored_cookies(&self) -> Vec<(String, String)> {
        lock(&self.restored).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        lock(&self.recorded).push(request.clone());

        let delay = lock(&self.delays).get(&request.path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let routes = lock(&self.routes);
        match routes.get(&request.path) {
            Some(handler) => handler(&request),
            None => Ok(ApiResponse::new(StatusCode::NOT_FOUND, "")),
        }
    }

    fn remember_access_token(&self, token: &str) {
        lock(&self.remembered).push(token.to_string());
    }

    fn cookies_for(&self, _path: &str) -> Option<String> {
        lock(&self.cookies).clone()
    }

    fn restore_cookies(&self, path: &str, cookies: &str) {
        lock(&self.restored).push((path.to_string(), cookies.to_string()));
    }
}

/// Request head and body as seen by [`LocalServer`]
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl SeenRequest {
    /// First header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, extra headers, body
pub type Reply = (u16, Vec<(String, String)>, String);

type ReplyFn = Arc<dyn Fn(&SeenRequest) -> Reply + Send + Sync>;

/// Minimal HTTP/1.1 server on a loopback port, one request per connection.
pub struct LocalServer {
    addr: std::net::SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl LocalServer {
    pub async fn start<F>(reply: F) -> Self
    where
        F: Fn(&SeenRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reply: ReplyFn = Arc::new(reply);

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                let reply = Arc::clone(&reply);
                tokio::spawn(async move {
                    let mut stream = stream;
                    let _ = handle_connection(&mut stream, &log, &reply).await;
                });
            }
        });

        Self { addr, seen }
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        lock(&self.seen).clone()
    }
}

async fn handle_connection(
    stream: &mut TcpStream,
    log: &Mutex<Vec<SeenRequest>>,
    reply: &ReplyFn,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

    let request = SeenRequest {
        method,
        path,
        headers,
        body,
    };
    let (status, extra, body) = reply(&request);
    lock(log).push(request);

    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        StatusCode::from_u16(status).ok()?.canonical_reason().unwrap_or(""),
        body.len()
    );
    for (name, value) in extra {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    response.push_str(&body);
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()
}

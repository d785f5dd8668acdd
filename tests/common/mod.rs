//! Fake SmartCasa endpoint for integration tests.
//!
//! Serves `POST /api_bridge.php` on an ephemeral port, records every JSON
//! body and answers through a swappable responder.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the fake server answers with.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: serde_json::json!({"error": "nope"}),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

pub struct FakeServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    responder: Arc<Mutex<Responder>>,
}

impl FakeServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Mutex<Responder>> = Arc::new(Mutex::new(Arc::new(responder)));

        let reqs = Arc::clone(&requests);
        let resp = Arc::clone(&responder);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let reqs = Arc::clone(&reqs);
                let resp = Arc::clone(&resp);
                tokio::spawn(async move {
                    let _ = handle(stream, reqs, resp).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            responder,
        }
    }

    /// Route replies by the request's `action` field.
    pub async fn by_action<F>(route: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::start(move |body| route(body["action"].as_str().unwrap_or(""))).await
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Reply + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap() = Arc::new(responder);
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, action: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["action"] == action)
            .collect()
    }

    /// Wait until at least `n` requests with `action` arrived.
    pub async fn wait_for(&self, action: &str, n: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let found = self.requests_for(action);
            if found.len() >= n {
                return found;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} '{action}' requests, got {}",
                found.len()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn handle(
    mut stream: TcpStream,
    requests: Arc<Mutex<Vec<Value>>>,
    responder: Arc<Mutex<Responder>>,
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    // Read until the header block parses.
    let (header_len, content_length, path) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        if let httparse::Status::Complete(len) = req.parse(&buf).unwrap() {
            let content_length = req
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                .and_then(|h| std::str::from_utf8(h.value).ok())
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            break (len, content_length, req.path.unwrap_or("/").to_string());
        }
    };

    while buf.len() < header_len + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    if path != "/api_bridge.php" {
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        stream.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    let body: Value = serde_json::from_slice(&buf[header_len..header_len + content_length])
        .unwrap_or(Value::Null);
    requests.lock().unwrap().push(body.clone());

    let responder = Arc::clone(&*responder.lock().unwrap());
    let reply = responder(&body);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let payload = reply.body.to_string();
    let response = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        payload.len(),
        payload,
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

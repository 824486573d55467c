//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vmsync_server::{lifecycle, Application, EmptyApplication, RunningServer, ServerConfig};

/// Config bound to an ephemeral local port.
pub fn test_config(workers: usize) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.keep_alive_secs = 5;
    config.workers.count = workers;
    config.session.slots_per_worker = 16;
    config
}

pub async fn start_server(config: ServerConfig) -> RunningServer {
    start_app(config, Arc::new(EmptyApplication)).await
}

pub async fn start_app(config: ServerConfig, app: Arc<dyn Application>) -> RunningServer {
    lifecycle::start(&config, app).await.expect("server starts")
}

/// A response read off a raw connection.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    /// Token from the `Location` header of a create response.
    pub fn token(&self) -> String {
        let location = self.header("Location").expect("location header");
        location.rsplit('/').next().unwrap_or_default().to_string()
    }
}

/// HTTP/1.1 client over one TCP connection, writing requests verbatim.
pub struct RawClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl RawClient {
    pub async fn connect(server: &RunningServer) -> Self {
        Self::connect_to(server.local_addr()).await
    }

    pub async fn connect_to(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    pub async fn write(&mut self, raw: &[u8]) {
        self.stream.write_all(raw).await.expect("write");
    }

    pub async fn send(&mut self, raw: &str) -> RawResponse {
        self.write(raw.as_bytes()).await;
        self.read_response().await
    }

    pub async fn read_response(&mut self) -> RawResponse {
        tokio::time::timeout(Duration::from_secs(5), self.read_response_inner())
            .await
            .expect("response within timeout")
    }

    async fn read_response_inner(&mut self) -> RawResponse {
        let header_end = loop {
            if let Some(pos) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            self.fill().await;
        };

        let head = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let status = status_line
            .split(' ')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status code");
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();
        let length: usize = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        while self.buffer.len() < body_start + length {
            self.fill().await;
        }
        let body = self.buffer[body_start..body_start + length].to_vec();
        self.buffer.drain(..body_start + length);
        RawResponse { status, headers, body }
    }

    async fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).await.expect("read");
        assert!(n > 0, "connection closed before a full response");
        self.buffer.extend_from_slice(&chunk[..n]);
    }

    /// Whether the server closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut chunk = [0u8; 64];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut chunk)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

pub fn create_request() -> &'static str {
    "POST /vm HTTP/1.1\r\nHost: test\r\nContent-Length: 0\r\n\r\n"
}

pub fn patch_request(token: &str, accept: &str, body: &str) -> String {
    format!(
        "PATCH /vm/{token} HTTP/1.1\r\nHost: test\r\nAccept: {accept}\r\nContent-Type: application/json-patch+json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

pub fn get_request(token: &str) -> String {
    format!("GET /vm/{token} HTTP/1.1\r\nHost: test\r\nAccept: application/json\r\n\r\n")
}

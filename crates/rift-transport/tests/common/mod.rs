#![allow(dead_code)]

use rift_transport::config::{ServerConfig, TlsConfig};
use rift_transport::server::{HttpServer, RequestHandler};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

pub fn tls_fixture() -> TlsConfig {
    TlsConfig {
        cert_path: fixture("cert.pem"),
        key_path: fixture("key.pem"),
    }
}

/// Config with an ephemeral HTTP listener on loopback.
pub fn local_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listen.bind_address = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.timeouts.stop_ms = 500;
    config
}

pub async fn start(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> HttpServer {
    let mut server = HttpServer::new(config, handler);
    server.start().await.expect("server should start");
    server
}

/// Send `request` on a fresh connection and read until the server closes.
pub async fn send_raw(port: u16, request: &str) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    stream.write_all(request.as_bytes()).await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

pub fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn parse(bytes: &[u8]) -> RawResponse {
        let split = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head should be complete");
        let head = String::from_utf8_lossy(&bytes[..split]).into_owned();
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line should carry a status code");
        RawResponse {
            status,
            head,
            body: bytes[split + 4..].to_vec(),
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("body should be JSON")
    }
}

/// Read one response with a `Content-Length` body, leaving the connection open.
pub async fn read_response<S>(stream: &mut S) -> RawResponse
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(split) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = RawResponse::parse(&buf[..split + 4]);
            let length: usize = head
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if buf.len() >= split + 4 + length {
                return RawResponse::parse(&buf[..split + 4 + length]);
            }
        }
        let n = stream.read(&mut chunk).await.expect("read should succeed");
        assert!(n > 0, "connection closed before a full response arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read a bare response head (no body), as returned for CONNECT.
pub async fn read_head<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.expect("read should succeed");
        assert!(n > 0, "connection closed inside a response head");
        head.push(byte[0]);
    }
    String::from_utf8(head).expect("head should be ASCII")
}

pub async fn write_all<S>(stream: &mut S, data: &str)
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(data.as_bytes())
        .await
        .expect("write should succeed");
    stream.flush().await.expect("flush should succeed");
}

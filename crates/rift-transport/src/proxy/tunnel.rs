//! CONNECT tunnelling to the MITM listener.
//!
//! A browser configured to use the server as its proxy opens HTTPS sites
//! with `CONNECT host:443`. The requested host is ignored: the tunnel always
//! leads to the local MITM listener, which terminates TLS with the
//! configured certificate and hands the decrypted requests to the normal
//! request pipeline.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONNECTION, CONTENT_TYPE};
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel only accepts CONNECT requests, got {0}")]
    NotConnect(Method),

    #[error("could not resolve tunnel target {0}:{1}")]
    Resolve(String, u16),

    #[error("failed to connect to tunnel target {0}: {1}")]
    Connect(SocketAddr, #[source] io::Error),

    #[error("tunnel connect was cancelled")]
    Cancelled,
}

/// Where every tunnel leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    /// Target on `port`; `host` defaults to `localhost`.
    pub fn new(host: Option<&str>, port: u16) -> Self {
        Self {
            host: host.unwrap_or("localhost").to_string(),
            port,
        }
    }
}

/// Outbound connect running on its own task. Dropping it aborts the connect.
struct ConnectTask {
    handle: JoinHandle<Result<TcpStream, TunnelError>>,
}

impl ConnectTask {
    fn spawn(target: TunnelTarget) -> Self {
        Self {
            handle: tokio::spawn(connect(target)),
        }
    }
}

impl Future for ConnectTask {
    type Output = Result<TcpStream, TunnelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or(Err(TunnelError::Cancelled)))
    }
}

impl Drop for ConnectTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Open a non-blocking socket to the target, trying each resolved address.
async fn connect(target: TunnelTarget) -> Result<TcpStream, TunnelError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| {
            debug!("Resolving {}:{} failed: {}", target.host, target.port, e);
            TunnelError::Resolve(target.host.clone(), target.port)
        })?
        .collect();

    let mut last_error = TunnelError::Resolve(target.host.clone(), target.port);
    for addr in addrs {
        match connect_addr(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    Err(last_error)
}

async fn connect_addr(addr: SocketAddr) -> Result<TcpStream, TunnelError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| TunnelError::Connect(addr, e))?;
    socket
        .set_nodelay(true)
        .map_err(|e| TunnelError::Connect(addr, e))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| TunnelError::Connect(addr, e))
}

/// Relay bytes until either side finishes, then drop both sides.
///
/// Returns the bytes moved client → backend and backend → client.
async fn relay<C>(
    client: C,
    backend: TcpStream,
    mut closing: broadcast::Receiver<()>,
) -> (u64, u64)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut backend_rd, mut backend_wr) = backend.into_split();
    let mut up = 0;
    let mut down = 0;

    tokio::select! {
        result = tokio::io::copy(&mut client_rd, &mut backend_wr) => match result {
            Ok(n) => up = n,
            Err(e) => debug!("Tunnel client side failed: {}", e),
        },
        result = tokio::io::copy(&mut backend_rd, &mut client_wr) => match result {
            Ok(n) => down = n,
            Err(e) => debug!("Tunnel backend side failed: {}", e),
        },
        Ok(()) = closing.recv() => debug!("Tunnel closed by shutdown"),
    }
    (up, down)
}

/// Handles CONNECT requests by splicing the client onto the MITM listener.
///
/// Clones share one close signal, so [`ProxyTunnel::close_all`] on any clone
/// ends every relay opened through them.
#[derive(Debug, Clone)]
pub struct ProxyTunnel {
    target: TunnelTarget,
    closing: broadcast::Sender<()>,
}

impl ProxyTunnel {
    pub fn new(target: TunnelTarget) -> Self {
        let (closing, _) = broadcast::channel(1);
        Self { target, closing }
    }

    pub fn target(&self) -> &TunnelTarget {
        &self.target
    }

    /// Tear down every established relay.
    pub fn close_all(&self) {
        let _ = self.closing.send(());
    }

    /// Answer a CONNECT request.
    ///
    /// Connection failures are reported to the client as a response; only a
    /// non-CONNECT request is an error.
    pub async fn handle<B>(
        &self,
        mut req: Request<B>,
    ) -> Result<Response<Full<Bytes>>, TunnelError> {
        if req.method() != Method::CONNECT {
            return Err(TunnelError::NotConnect(req.method().clone()));
        }
        let requested = req
            .uri()
            .authority()
            .map(|authority| authority.to_string())
            .unwrap_or_default();
        let on_upgrade = hyper::upgrade::on(&mut req);
        drop(req);

        match ConnectTask::spawn(self.target.clone()).await {
            Ok(backend) => Ok(self.on_connected(&requested, on_upgrade, backend)),
            Err(err) => Ok(self.on_connect_failed(&requested, err)),
        }
    }

    fn on_connected(
        &self,
        requested: &str,
        on_upgrade: OnUpgrade,
        backend: TcpStream,
    ) -> Response<Full<Bytes>> {
        info!(
            "Tunnel for {} established to {}:{}",
            requested, self.target.host, self.target.port
        );
        let requested = requested.to_string();
        let closing = self.closing.subscribe();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let (up, down) = relay(TokioIo::new(upgraded), backend, closing).await;
                    debug!(
                        "Tunnel for {} closed ({} bytes up, {} bytes down)",
                        requested, up, down
                    );
                }
                Err(e) => warn!("CONNECT upgrade for {} failed: {}", requested, e),
            }
        });
        Response::new(Full::new(Bytes::new()))
    }

    fn on_connect_failed(&self, requested: &str, err: TunnelError) -> Response<Full<Bytes>> {
        warn!("Tunnel for {} could not be opened: {}", requested, err);
        let mut response = Response::new(Full::new(Bytes::from(format!(
            "Tunnel to {}:{} failed\n",
            self.target.host, self.target.port
        ))));
        *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
        response
            .headers_mut()
            .insert(CONNECTION, hyper::header::HeaderValue::from_static("close"));
        response.headers_mut().insert(
            CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain"),
        );
        response
    }
}

//! HTTP server shell hosting the transport core.
//!
//! # Module Structure
//!
//! - `handler` - the [`RequestHandler`] seam and request types
//! - `dispatch` - per-request pipeline (tunnel, classify, parse, handle)
//! - `header_mode` - process-wide response header casing
//! - `default_handler` - fault-route handler used by the binary

mod default_handler;
mod dispatch;
mod handler;
pub mod header_mode;

pub use default_handler::FaultRouteHandler;
pub use dispatch::MAX_FORWARDS;
pub use handler::{HandlerOutcome, InboundRequest, MultipartBody, RequestHandler};
pub use header_mode::HeaderMode;

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionHandle, ConnectionInfo, ListenerKind};
use crate::proxy::network::bind_with_retries;
use crate::proxy::tls::create_tls_acceptor;
use crate::proxy::{ProxyClassifier, ProxyTunnel, TunnelTarget};
use anyhow::Context;
use dispatch::Dispatcher;
use hyper::rt::{Read, Write};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Ports the listeners ended up bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundPorts {
    pub http: Option<u16>,
    pub https: Option<u16>,
    pub mitm: Option<u16>,
}

#[derive(Clone, Copy)]
struct ConnectionSettings {
    idle_timeout: Duration,
    header_mode: HeaderMode,
}

struct RunningServer {
    ports: BoundPorts,
    shutdown_tx: broadcast::Sender<()>,
    accept_tasks: Vec<JoinHandle<()>>,
    tunnel: Option<ProxyTunnel>,
}

impl RunningServer {
    fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(tunnel) = &self.tunnel {
            tunnel.close_all();
        }
    }
}

/// One accept loop's worth of state.
struct Listener {
    listener: TcpListener,
    kind: ListenerKind,
    tls: Option<TlsAcceptor>,
}

pub struct HttpServer {
    config: Arc<ServerConfig>,
    handler: Arc<dyn RequestHandler>,
    running: Option<RunningServer>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            config: Arc::new(config),
            handler,
            running: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn ports(&self) -> BoundPorts {
        self.running
            .as_ref()
            .map(|running| running.ports)
            .unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.ports().http
    }

    pub fn https_port(&self) -> Option<u16> {
        self.ports().https
    }

    pub fn mitm_port(&self) -> Option<u16> {
        self.ports().mitm
    }

    /// Bind every configured listener and start accepting connections.
    pub async fn start(&mut self) -> Result<BoundPorts, anyhow::Error> {
        if self.running.is_some() {
            anyhow::bail!("Server is already running");
        }
        self.config.validate()?;

        let settings = ConnectionSettings {
            idle_timeout: self.config.timeouts.idle(),
            header_mode: header_mode::init(HeaderMode::from_strict(self.config.strict_headers)),
        };

        let mut listeners = Vec::new();
        let mut ports = BoundPorts::default();

        if self.config.listen.enabled {
            let listener = self.bind(self.config.listen.port).await?;
            ports.http = Some(listener.local_addr()?.port());
            listeners.push(Listener {
                listener,
                kind: ListenerKind::Http,
                tls: None,
            });
        }

        if let Some(https) = &self.config.https {
            let acceptor = create_tls_acceptor(&https.tls)?;
            let listener = self.bind(https.port).await?;
            ports.https = Some(listener.local_addr()?.port());
            listeners.push(Listener {
                listener,
                kind: ListenerKind::Https,
                tls: Some(acceptor),
            });
        }

        let browser_proxy = &self.config.browser_proxy;
        if browser_proxy.enabled {
            let tls = browser_proxy
                .tls
                .as_ref()
                .context("browser proxy requires TLS configuration")?;
            let acceptor = create_tls_acceptor(tls)?;
            let listener = self.bind(browser_proxy.mitm_port).await?;
            ports.mitm = Some(listener.local_addr()?.port());
            listeners.push(Listener {
                listener,
                kind: ListenerKind::Mitm,
                tls: Some(acceptor),
            });
        }

        let tunnel = ports
            .mitm
            .map(|port| ProxyTunnel::new(TunnelTarget::new(browser_proxy.host.as_deref(), port)));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.handler),
            ProxyClassifier::new(ports.mitm),
            tunnel.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let accept_tasks = listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(accept_loop(
                    listener,
                    Arc::clone(&dispatcher),
                    settings,
                    shutdown_tx.subscribe(),
                ))
            })
            .collect();

        info!(
            "Server started (http: {:?}, https: {:?}, mitm: {:?}, header mode: {:?})",
            ports.http, ports.https, ports.mitm, settings.header_mode
        );
        self.running = Some(RunningServer {
            ports,
            shutdown_tx,
            accept_tasks,
            tunnel,
        });
        Ok(ports)
    }

    /// Stop accepting, close live connections and CONNECT tunnels, and wait
    /// for the listeners to wind down (bounded by `timeouts.stop_ms`).
    pub async fn stop(&mut self) -> Result<(), anyhow::Error> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.signal_shutdown();

        let deadline = self.config.timeouts.stop();
        for mut task in running.accept_tasks {
            if tokio::time::timeout(deadline, &mut task).await.is_err() {
                warn!("Listener did not stop within {:?}; aborting it", deadline);
                task.abort();
            }
        }
        info!("Server stopped");
        Ok(())
    }

    async fn bind(&self, port: u16) -> Result<TcpListener, anyhow::Error> {
        let addr = self.config.listen.socket_addr(port)?;
        let listener = bind_with_retries(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.signal_shutdown();
        }
    }
}

async fn accept_loop(
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let Listener {
        listener,
        kind,
        tls,
    } = listener;
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
                        }
                        let local_addr = match stream.local_addr() {
                            Ok(addr) => addr,
                            Err(e) => {
                                debug!("Dropping connection from {}: {}", remote_addr, e);
                                continue;
                            }
                        };
                        let info = ConnectionInfo { local_addr, remote_addr, listener: kind };
                        let (shared, handle) = connection::attach(stream, info);
                        let dispatcher = Arc::clone(&dispatcher);
                        let tls = tls.clone();
                        connections.spawn(async move {
                            match tls {
                                Some(acceptor) => match acceptor.accept(shared).await {
                                    Ok(tls_stream) => {
                                        serve(TokioIo::new(tls_stream), handle, dispatcher, settings).await
                                    }
                                    Err(e) => debug!("TLS handshake with {} failed: {}", remote_addr, e),
                                },
                                None => serve(TokioIo::new(shared), handle, dispatcher, settings).await,
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error on {} listener: {}", kind.as_str(), e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.recv() => {
                info!("{} listener shutting down", kind.as_str());
                break;
            }
        }
    }

    // Dropping the serving tasks closes their sockets
    connections.shutdown().await;
}

async fn serve<I>(
    io: I,
    connection: ConnectionHandle,
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
) where
    I: Read + Write + Unpin + Send + 'static,
{
    let remote_addr = connection.info().remote_addr;
    let service = service_fn(move |req| {
        let dispatcher = Arc::clone(&dispatcher);
        let connection = connection.clone();
        async move { dispatcher.dispatch(req, &connection).await }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(settings.idle_timeout);
    settings.header_mode.apply(&mut builder);

    if let Err(e) = builder.serve_connection(io, service).with_upgrades().await {
        debug!("Connection error from {}: {}", remote_addr, e);
    }
}

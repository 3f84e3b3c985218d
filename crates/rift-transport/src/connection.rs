//! Raw connection handles.
//!
//! Every accepted socket is split into two views of the same TCP stream:
//!
//! - [`SharedStream`] is handed to the framing layer (hyper, or the TLS
//!   acceptor in front of hyper) and implements `AsyncRead`/`AsyncWrite`.
//! - [`ConnectionHandle`] stays with the request pipeline and lets the fault
//!   injector take the bare stream away from the framing layer.
//!
//! Once the stream has been taken, every read or write through the
//! `SharedStream` fails with `NotConnected`, so no normal response can be
//! framed on a connection that has been corrupted on purpose.

use crate::fault::FaultInjector;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

type TransportSlot = Arc<Mutex<Option<TcpStream>>>;

/// Errors raised while operating directly on a connection's transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("connection transport was already taken")]
    AlreadyTaken,
}

/// Which listener accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Plain HTTP listener (also the browser-proxy entry point)
    Http,
    /// HTTPS listener
    Https,
    /// TLS listener that CONNECT tunnels are redirected to
    Mitm,
}

impl ListenerKind {
    /// Scheme a request observes when it arrives on this listener.
    pub fn scheme(&self) -> &'static str {
        match self {
            ListenerKind::Http => "http",
            ListenerKind::Https | ListenerKind::Mitm => "https",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Http => "http",
            ListenerKind::Https => "https",
            ListenerKind::Mitm => "mitm",
        }
    }
}

/// Addressing metadata of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub listener: ListenerKind,
}

impl ConnectionInfo {
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn scheme(&self) -> &'static str {
        self.listener.scheme()
    }
}

/// Split an accepted stream into its framing view and its control handle.
pub fn attach(stream: TcpStream, info: ConnectionInfo) -> (SharedStream, ConnectionHandle) {
    let slot: TransportSlot = Arc::new(Mutex::new(Some(stream)));
    (
        SharedStream {
            slot: Arc::clone(&slot),
        },
        ConnectionHandle { slot, info },
    )
}

/// Control handle for one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    slot: TransportSlot,
    info: ConnectionInfo,
}

impl ConnectionHandle {
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// True until the transport has been taken by a fault.
    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Fault injector bound to this connection.
    pub fn fault_injector(&self) -> FaultInjector {
        FaultInjector::new(self.clone())
    }

    /// Remove the TCP stream from the framing layer.
    ///
    /// Succeeds at most once per connection.
    pub(crate) fn take_transport(&self) -> Result<TcpStream, TransportError> {
        self.slot.lock().take().ok_or(TransportError::AlreadyTaken)
    }
}

/// `AsyncRead + AsyncWrite` view of a connection used by the framing layer.
#[derive(Debug)]
pub struct SharedStream {
    slot: TransportSlot,
}

fn detached() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "connection transport taken by fault injector",
    )
}

impl AsyncRead for SharedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(detached())),
        }
    }
}

impl AsyncWrite for SharedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(detached())),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            None => Poll::Ready(Err(detached())),
        }
    }

    fn is_write_vectored(&self) -> bool {
        true
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(detached())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            // Already closed by whoever took it
            None => Poll::Ready(Ok(())),
        }
    }
}

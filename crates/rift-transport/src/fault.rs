//! Connection-level fault injection.
//!
//! Faults operate on the raw TCP stream of a live connection, bypassing the
//! HTTP framing layer entirely. The peer observes a real network failure:
//! a reset, an empty reply, a corrupt chunked body or plain noise.

use crate::connection::{ConnectionHandle, TransportError};
use crate::server::header_mode::{self, HeaderMode};
use serde::{Deserialize, Serialize};
use socket2::SockRef;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Fixed noise written by the data-corrupting faults.
pub const GARBAGE: &[u8] = b"lskdu018973t09sylgasjkfg1][]'./.sdlv";

/// Connection faults a handler can select instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCommand {
    /// Abortive close: the peer sees ECONNRESET
    ConnectionResetByPeer,
    /// Close without writing anything
    EmptyResponse,
    /// Valid chunked response head followed by bytes that are not a chunk
    MalformedResponseChunk,
    /// Noise with no response head, then close
    RandomDataThenClose,
}

impl FaultCommand {
    pub const ALL: [FaultCommand; 4] = [
        FaultCommand::ConnectionResetByPeer,
        FaultCommand::EmptyResponse,
        FaultCommand::MalformedResponseChunk,
        FaultCommand::RandomDataThenClose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultCommand::ConnectionResetByPeer => "CONNECTION_RESET_BY_PEER",
            FaultCommand::EmptyResponse => "EMPTY_RESPONSE",
            FaultCommand::MalformedResponseChunk => "MALFORMED_RESPONSE_CHUNK",
            FaultCommand::RandomDataThenClose => "RANDOM_DATA_THEN_CLOSE",
        }
    }
}

impl fmt::Display for FaultCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaultCommand::ALL
            .into_iter()
            .find(|command| command.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown fault '{s}'"))
    }
}

/// Response head for the malformed-chunk fault, cased like every other
/// response head this process writes.
fn malformed_response_head(mode: HeaderMode) -> &'static [u8] {
    match mode {
        HeaderMode::Strict => b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n",
        HeaderMode::Compatible => b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n",
    }
}

/// Executes one destructive operation on a connection.
///
/// Every operation consumes the injector and takes the transport away from
/// the framing layer, so at most one fault runs per connection.
///
/// Only the four operations are public; picking one from a [`FaultCommand`]
/// stays inside the crate.
///
/// ```compile_fail
/// use rift_transport::fault::{FaultCommand, FaultInjector};
///
/// async fn pick(injector: FaultInjector) {
///     let _ = injector.inject(FaultCommand::EmptyResponse).await;
/// }
/// ```
#[derive(Debug)]
pub struct FaultInjector {
    connection: ConnectionHandle,
}

impl FaultInjector {
    pub(crate) fn new(connection: ConnectionHandle) -> Self {
        Self { connection }
    }

    /// Run the operation selected by `command`.
    pub(crate) async fn inject(self, command: FaultCommand) -> Result<(), TransportError> {
        warn!(
            "Injecting fault {} on connection {} -> {}",
            command,
            self.connection.info().remote_addr,
            self.connection.info().local_addr
        );
        match command {
            FaultCommand::ConnectionResetByPeer => self.connection_reset_by_peer().await,
            FaultCommand::EmptyResponse => self.empty_response_and_close_connection().await,
            FaultCommand::MalformedResponseChunk => self.malformed_response_chunk().await,
            FaultCommand::RandomDataThenClose => self.random_data_and_close_connection().await,
        }
    }

    /// Close with `SO_LINGER` set to zero so the kernel sends RST.
    pub async fn connection_reset_by_peer(self) -> Result<(), TransportError> {
        let stream = self.connection.take_transport()?;
        SockRef::from(&stream).set_linger(Some(Duration::ZERO))?;
        drop(stream);
        debug!("Connection reset sent to {}", self.connection.info().remote_addr);
        Ok(())
    }

    pub async fn empty_response_and_close_connection(self) -> Result<(), TransportError> {
        let mut stream = self.connection.take_transport()?;
        stream.shutdown().await?;
        Ok(())
    }

    pub async fn malformed_response_chunk(self) -> Result<(), TransportError> {
        let mut stream = self.connection.take_transport()?;
        stream
            .write_all(malformed_response_head(header_mode::current()))
            .await?;
        stream.flush().await?;
        stream.write_all(GARBAGE).await?;
        stream.shutdown().await?;
        Ok(())
    }

    pub async fn random_data_and_close_connection(self) -> Result<(), TransportError> {
        let mut stream = self.connection.take_transport()?;
        stream.write_all(GARBAGE).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

//! Message channel over one transport connection
//!
//! Wraps a single connected transport stream with whole-buffer send and
//! as-available receive. The channel deliberately does NOT frame
//! messages: `receive` returns whatever bytes the OS hands over, and
//! message boundaries are the decoder's responsibility. That keeps the
//! decoder identical over both transports, since neither UNIX sockets
//! nor named pipes guarantee message-sized reads.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::config::TransportConfig;
use crate::transport::{self, TransportStream};

/// Size of the channel read buffer
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection-scoped transport failures. Recovered by closing the one
/// affected connection; never fatal to the server.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Opening the client side of the transport failed
    #[error("Failed to connect to endpoint: {0}")]
    Connect(#[source] std::io::Error),

    /// Accepting an incoming connection failed
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// Reading from the connection failed
    #[error("Failed to read from connection: {0}")]
    Read(#[source] std::io::Error),

    /// Writing to the connection failed or was cut short
    #[error("Failed to write to connection: {0}")]
    Write(#[source] std::io::Error),

    /// The channel was used after `close`, or the peer closed it first
    #[error("Channel is closed")]
    Closed,
}

/// Bidirectional byte channel over one transport connection
///
/// Owned by exactly one connection worker for its whole lifetime; there
/// is no cross-connection sharing or handoff.
pub struct MessageChannel {
    stream: Option<TransportStream>,
}

impl MessageChannel {
    /// Wrap an accepted transport stream.
    pub fn new(stream: TransportStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Open a client connection to the configured endpoint.
    pub async fn connect(config: &TransportConfig) -> Result<Self, ChannelError> {
        let stream = transport::connect(config).await?;
        Ok(Self::new(stream))
    }

    /// Write one encoded message in full.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        stream.write_all(bytes).await.map_err(ChannelError::Write)?;
        stream.flush().await.map_err(ChannelError::Write)?;
        Ok(())
    }

    /// Read whatever bytes are currently available.
    ///
    /// Returns `Ok(None)` when the peer has closed its end (end of
    /// stream); that is a normal disconnect, not an error.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let stream = self.stream.as_mut().ok_or(ChannelError::Closed)?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let n = stream.read(&mut buf).await.map_err(ChannelError::Read)?;
        if n == 0 {
            debug!("Peer closed connection");
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    /// Close the channel; idempotent, further calls do nothing.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    /// True once the channel has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

//! Transport abstraction for the command channel
//!
//! Two OS-level IPC primitives back the channel: UNIX domain sockets
//! (Linux/macOS) and named pipes (Windows). Both provide ordered,
//! reliable byte-stream delivery with no message boundaries; everything
//! above this module is platform-agnostic and the implementation is
//! selected at startup from the transport configuration, not scattered
//! through the core logic.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::channel::ChannelError;
use crate::config::{TransportConfig, TransportKind};

/// Errors raised while binding the transport endpoint
#[derive(Error, Debug)]
pub enum BindError {
    /// Another live process already serves this endpoint. Distinct from
    /// the stale-artifact case, which is cleaned up silently, so an
    /// operator can tell "another instance is really running" from
    /// "clean up and retry".
    #[error("Endpoint '{0}' is in use by another process")]
    EndpointInUse(String),

    /// The configured transport does not exist on this platform
    #[error("Transport '{kind}' is not supported on this platform")]
    UnsupportedTransport {
        /// Requested transport kind
        kind: TransportKind,
    },

    /// Endpoint setup failed (directory creation, stale-file removal,
    /// or the bind itself)
    #[error("Failed to bind endpoint '{endpoint}': {source}")]
    Io {
        /// Endpoint being bound
        endpoint: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}

/// A bound server-side transport endpoint
pub enum TransportListener {
    /// UNIX domain socket listener
    #[cfg(unix)]
    UnixSocket(unix::UnixSocketListener),
    /// Named pipe listener
    #[cfg(windows)]
    NamedPipe(windows::NamedPipeListener),
}

impl TransportListener {
    /// Bind the endpoint selected by the configuration.
    pub async fn bind(config: &TransportConfig) -> Result<Self, BindError> {
        match config.kind {
            #[cfg(unix)]
            TransportKind::UnixSocket => {
                let listener = unix::UnixSocketListener::bind(config).await?;
                Ok(TransportListener::UnixSocket(listener))
            }
            #[cfg(windows)]
            TransportKind::NamedPipe => {
                let listener = windows::NamedPipeListener::bind(config)?;
                Ok(TransportListener::NamedPipe(listener))
            }
            #[allow(unreachable_patterns)]
            kind => Err(BindError::UnsupportedTransport { kind }),
        }
    }

    /// Wait for and accept the next incoming connection.
    pub async fn accept(&self) -> Result<TransportStream, ChannelError> {
        match self {
            #[cfg(unix)]
            TransportListener::UnixSocket(listener) => listener.accept().await,
            #[cfg(windows)]
            TransportListener::NamedPipe(listener) => listener.accept().await,
        }
    }

    /// Human-readable endpoint description for logging.
    pub fn endpoint(&self) -> String {
        match self {
            #[cfg(unix)]
            TransportListener::UnixSocket(listener) => listener.path().display().to_string(),
            #[cfg(windows)]
            TransportListener::NamedPipe(listener) => listener.path().to_string(),
        }
    }
}

/// Open a client connection to the configured endpoint.
pub async fn connect(config: &TransportConfig) -> Result<TransportStream, ChannelError> {
    match config.kind {
        #[cfg(unix)]
        TransportKind::UnixSocket => unix::connect(config).await,
        #[cfg(windows)]
        TransportKind::NamedPipe => windows::connect(config).await,
        #[allow(unreachable_patterns)]
        kind => Err(ChannelError::Connect(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("transport '{}' is not supported on this platform", kind),
        ))),
    }
}

/// One connected byte stream, owned by exactly one message channel
pub enum TransportStream {
    /// Connected UNIX domain socket
    #[cfg(unix)]
    UnixSocket(tokio::net::UnixStream),
    /// Connected named pipe end
    #[cfg(windows)]
    NamedPipe(windows::NamedPipeStream),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            TransportStream::UnixSocket(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(windows)]
            TransportStream::NamedPipe(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            TransportStream::UnixSocket(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(windows)]
            TransportStream::NamedPipe(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            TransportStream::UnixSocket(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(windows)]
            TransportStream::NamedPipe(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            TransportStream::UnixSocket(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(windows)]
            TransportStream::NamedPipe(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

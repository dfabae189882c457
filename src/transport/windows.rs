//! Windows named pipe transport
//!
//! The endpoint name maps to `\\.\pipe\<prefix>-<name>` (the `pipe-prefix`
//! property, defaulting to `vigil`). Named pipes cannot go stale: the OS
//! removes the pipe when its last instance closes, so a creation failure
//! with the first-instance flag means another server really owns the name.

use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};
use tokio::sync::Mutex;
use tracing::debug;

use super::{BindError, TransportStream};
use crate::channel::ChannelError;
use crate::config::TransportConfig;

/// Property key overriding the pipe name prefix
pub const PIPE_PREFIX_KEY: &str = "pipe-prefix";

const DEFAULT_PIPE_PREFIX: &str = "vigil";

/// All pipes may be busy when a client connects between two server
/// instances; retry after a short pause.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Windows reports a busy pipe with this raw OS error
const ERROR_PIPE_BUSY: i32 = 231;

/// Resolve the full pipe path for an endpoint name.
fn pipe_path(config: &TransportConfig) -> String {
    let prefix = config.extra(PIPE_PREFIX_KEY).unwrap_or(DEFAULT_PIPE_PREFIX);
    format!(r"\\.\pipe\{}-{}", prefix, config.endpoint_name)
}

/// Named pipe listener holding the next unconnected server instance
#[derive(Debug)]
pub struct NamedPipeListener {
    path: String,
    // The instance waiting for the next client; a fresh instance is
    // created before the connected one is handed out, so the name is
    // never momentarily unowned.
    next: Mutex<Option<NamedPipeServer>>,
}

impl NamedPipeListener {
    /// Claim the pipe name by creating its first instance.
    pub fn bind(config: &TransportConfig) -> Result<Self, BindError> {
        let path = pipe_path(config);
        let first = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)
            .map_err(|source| {
                if source.kind() == ErrorKind::PermissionDenied {
                    BindError::EndpointInUse(path.clone())
                } else {
                    BindError::Io {
                        endpoint: path.clone(),
                        source,
                    }
                }
            })?;

        debug!("Created named pipe {}", path);
        Ok(Self {
            path,
            next: Mutex::new(Some(first)),
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<TransportStream, ChannelError> {
        let mut next = self.next.lock().await;
        let server = match next.take() {
            Some(server) => server,
            None => ServerOptions::new()
                .create(&self.path)
                .map_err(ChannelError::Accept)?,
        };
        server.connect().await.map_err(ChannelError::Accept)?;

        // Keep the name owned before handing out the connected instance
        *next = Some(
            ServerOptions::new()
                .create(&self.path)
                .map_err(ChannelError::Accept)?,
        );

        Ok(TransportStream::NamedPipe(NamedPipeStream::Server(server)))
    }

    /// The full pipe path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Open a client connection to the configured endpoint.
pub async fn connect(config: &TransportConfig) -> Result<TransportStream, ChannelError> {
    let path = pipe_path(config);
    loop {
        match ClientOptions::new().open(&path) {
            Ok(client) => return Ok(TransportStream::NamedPipe(NamedPipeStream::Client(client))),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
            }
            Err(source) => return Err(ChannelError::Connect(source)),
        }
    }
}

/// Either end of a connected named pipe
pub enum NamedPipeStream {
    /// Server side of an accepted connection
    Server(NamedPipeServer),
    /// Client side of an opened connection
    Client(NamedPipeClient),
}

impl AsyncRead for NamedPipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NamedPipeStream::Server(pipe) => Pin::new(pipe).poll_read(cx, buf),
            NamedPipeStream::Client(pipe) => Pin::new(pipe).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NamedPipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NamedPipeStream::Server(pipe) => Pin::new(pipe).poll_write(cx, buf),
            NamedPipeStream::Client(pipe) => Pin::new(pipe).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NamedPipeStream::Server(pipe) => Pin::new(pipe).poll_flush(cx),
            NamedPipeStream::Client(pipe) => Pin::new(pipe).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NamedPipeStream::Server(pipe) => Pin::new(pipe).poll_shutdown(cx),
            NamedPipeStream::Client(pipe) => Pin::new(pipe).poll_shutdown(cx),
        }
    }
}

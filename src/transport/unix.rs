//! UNIX domain socket transport
//!
//! The endpoint name maps to a socket file `sock-<name>` inside a socket
//! directory (the `socket-dir` property, defaulting to `vigil-agent`
//! under the system temporary directory). The directory is created with
//! owner-only permissions if missing.
//!
//! A socket file left behind by a crashed process is detected by probing
//! it with a connect: a refused connection means nothing is listening, so
//! the stale file is removed and binding proceeds; an accepted connection
//! means another instance really is running and the bind fails.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use super::{BindError, TransportStream};
use crate::channel::ChannelError;
use crate::config::TransportConfig;

/// Property key overriding the socket directory
pub const SOCKET_DIR_KEY: &str = "socket-dir";

/// Filename prefix for socket files
const SOCKET_PREFIX: &str = "sock-";

/// Resolve the socket path for an endpoint name.
fn socket_path(config: &TransportConfig) -> PathBuf {
    let dir = match config.extra(SOCKET_DIR_KEY) {
        Some(dir) => PathBuf::from(dir),
        None => std::env::temp_dir().join("vigil-agent"),
    };
    dir.join(format!("{}{}", SOCKET_PREFIX, config.endpoint_name))
}

/// Bound UNIX domain socket, removed from the filesystem on drop
#[derive(Debug)]
pub struct UnixSocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixSocketListener {
    /// Bind the socket for the configured endpoint.
    pub async fn bind(config: &TransportConfig) -> Result<Self, BindError> {
        let path = socket_path(config);
        let io_err = |source| BindError::Io {
            endpoint: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            create_socket_dir(parent).map_err(io_err)?;
        }

        if path.exists() {
            // Distinguish a live endpoint from a stale artifact of a
            // crashed run
            match UnixStream::connect(&path).await {
                Ok(_) => {
                    return Err(BindError::EndpointInUse(path.display().to_string()));
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    info!("Removing stale socket at {:?}", path);
                    std::fs::remove_file(&path).map_err(io_err)?;
                }
                Err(source) => return Err(io_err(source)),
            }
        }

        let listener = UnixListener::bind(&path).map_err(|source| {
            if source.kind() == ErrorKind::AddrInUse {
                BindError::EndpointInUse(path.display().to_string())
            } else {
                BindError::Io {
                    endpoint: path.display().to_string(),
                    source,
                }
            }
        })?;

        debug!("Bound Unix socket at {:?}", path);
        Ok(Self { listener, path })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<TransportStream, ChannelError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(ChannelError::Accept)?;
        Ok(TransportStream::UnixSocket(stream))
    }

    /// The socket file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        // Remove the socket file so the endpoint does not linger as a
        // stale artifact
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Create the socket directory with owner-only permissions if missing.
fn create_socket_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.exists() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true).mode(0o700);
    builder.create(dir)
}

/// Open a client connection to the configured endpoint.
pub async fn connect(config: &TransportConfig) -> Result<TransportStream, ChannelError> {
    let path = socket_path(config);
    let stream = UnixStream::connect(&path)
        .await
        .map_err(ChannelError::Connect)?;
    Ok(TransportStream::UnixSocket(stream))
}

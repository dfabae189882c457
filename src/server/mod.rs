//! Configuration/command server
//!
//! Owns the accept loop: binds the configured transport, accepts
//! connections, and runs one worker per connection. Each worker pulls
//! bytes through the message channel into the decoder, hands completed
//! requests to the dispatcher, and writes responses back in strict
//! request order. Connections stay open across multiple round trips.
//!
//! Lifecycle is `Stopped -> Listening -> Stopped`. `stop_listening`
//! stops accepting immediately, lets accepted connections finish their
//! current request/response cycle, and force-closes lingering ones after
//! a bounded grace period so shutdown is never blocked by a stuck peer.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::channel::MessageChannel;
use crate::command::CommandDispatcher;
use crate::config::TransportConfig;
use crate::error::AgentError;
use crate::transport::{BindError, TransportListener, TransportStream};
use crate::wire::{self, DecodeState, MessageDecoder};

/// Default grace period granted to open connections on shutdown
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Server lifecycle errors; fatal to startup, unlike connection-scoped
/// failures which are handled inside the workers
#[derive(Error, Debug)]
pub enum ServerError {
    /// `start_listening` was called while already listening
    #[error("Server is already listening")]
    AlreadyListening,

    /// The transport endpoint could not be bound
    #[error("Failed to bind transport: {0}")]
    Bind(#[from] BindError),
}

enum ServerState {
    Stopped,
    Listening {
        shutdown: watch::Sender<bool>,
        accept_task: JoinHandle<()>,
    },
}

/// The agent command server
pub struct CommandServer {
    dispatcher: Arc<CommandDispatcher>,
    grace_period: Duration,
    state: Mutex<ServerState>,
}

impl CommandServer {
    /// Create a stopped server around a dispatcher.
    pub fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            grace_period: DEFAULT_GRACE_PERIOD,
            state: Mutex::new(ServerState::Stopped),
        }
    }

    /// Override the shutdown grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The dispatcher plugins register their commands with.
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Bind the configured endpoint and start accepting connections.
    pub async fn start_listening(&self, config: &TransportConfig) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if matches!(*state, ServerState::Listening { .. }) {
            return Err(ServerError::AlreadyListening);
        }

        let listener = TransportListener::bind(config).await?;
        info!("Command server listening at {}", listener.endpoint());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = Arc::clone(&self.dispatcher);
        let grace_period = self.grace_period;
        let accept_task = tokio::spawn(accept_loop(listener, dispatcher, shutdown_rx, grace_period));

        *state = ServerState::Listening {
            shutdown,
            accept_task,
        };
        Ok(())
    }

    /// Stop accepting connections and drain the open ones.
    ///
    /// Idempotent; calling from the stopped state has no effect. Returns
    /// once the accept loop and all workers have finished (or the grace
    /// period forced the stragglers closed).
    pub async fn stop_listening(&self) {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ServerState::Stopped) {
            ServerState::Stopped => {
                debug!("Stop requested while already stopped");
            }
            ServerState::Listening {
                shutdown,
                accept_task,
            } => {
                info!("Stopping command server");
                let _ = shutdown.send(true);
                if let Err(e) = accept_task.await {
                    error!("Accept loop task failed: {}", e);
                }
                info!("Command server stopped");
            }
        }
    }

    /// True while the accept loop is running.
    pub async fn is_listening(&self) -> bool {
        matches!(*self.state.lock().await, ServerState::Listening { .. })
    }
}

/// Accept connections until shutdown, then drain the workers.
async fn accept_loop(
    listener: TransportListener,
    dispatcher: Arc<CommandDispatcher>,
    shutdown: watch::Receiver<bool>,
    grace_period: Duration,
) {
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut shutdown_accept = shutdown.clone();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok(stream) => {
                    debug!("Accepted connection");
                    let dispatcher = Arc::clone(&dispatcher);
                    let shutdown = shutdown.clone();
                    workers.spawn(async move {
                        if let Err(e) = run_connection(stream, dispatcher, shutdown).await {
                            error!("Connection worker error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = shutdown_accept.changed() => break,
        }

        // Reap workers that have already finished
        while workers.try_join_next().is_some() {}
    }

    // Unbind before draining so new connection attempts are rejected
    // while accepted ones finish
    drop(listener);

    if workers.is_empty() {
        return;
    }
    debug!("Draining {} open connections", workers.len());
    if timeout(grace_period, drain(&mut workers)).await.is_err() {
        warn!(
            "Force-closing {} connections still open after {:?} grace period",
            workers.len(),
            grace_period
        );
        workers.shutdown().await;
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while workers.join_next().await.is_some() {}
}

/// Serve one connection until the peer disconnects, a decode error
/// forces a close, or shutdown drains it.
async fn run_connection(
    stream: TransportStream,
    dispatcher: Arc<CommandDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AgentError> {
    let mut channel = MessageChannel::new(stream);
    let result = serve_requests(&mut channel, &dispatcher, &mut shutdown).await;
    channel.close().await;
    result
}

async fn serve_requests(
    channel: &mut MessageChannel,
    dispatcher: &CommandDispatcher,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), AgentError> {
    let mut decoder = MessageDecoder::new();
    let mut draining = false;

    loop {
        // The signal may predate this worker's receiver clone; check the
        // current value, not just future changes
        if !draining && *shutdown.borrow() {
            if decoder.is_idle() {
                return Ok(());
            }
            draining = true;
        }

        let chunk = if draining {
            // Shutdown already requested: finish the in-flight message
            // without watching for further signals
            channel.receive().await?
        } else {
            tokio::select! {
                result = channel.receive() => result?,
                _ = shutdown.changed() => {
                    if decoder.is_idle() {
                        // No request in flight; close right away
                        return Ok(());
                    }
                    draining = true;
                    continue;
                }
            }
        };

        let Some(chunk) = chunk else {
            // Peer disconnected
            return Ok(());
        };

        let mut rest: &[u8] = &chunk;
        while !rest.is_empty() {
            let consumed = decoder.feed(rest)?;
            rest = &rest[consumed..];

            if decoder.state() == DecodeState::AllParametersRead {
                let message = match decoder.take_message() {
                    Ok(message) => message,
                    Err(e) => {
                        // State was checked above; treat as a decoder bug
                        // and give up on the connection
                        error!("Decoder refused completed message: {}", e);
                        return Ok(());
                    }
                };
                let request = wire::request_from(message)?;
                debug!("Dispatching request '{}'", request.command_name);
                let response = dispatcher.dispatch(&request);
                channel.send(&wire::encode_response(&response)?).await?;

                if draining {
                    // The in-flight cycle is complete; any further
                    // buffered bytes are abandoned with the connection
                    return Ok(());
                }
            }
        }
    }
}

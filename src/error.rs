//! Error types for the agent command channel
//!
//! Each module defines its own error enum at its boundary (configuration,
//! transport binding, channel I/O, wire decoding, dispatch, server
//! lifecycle). This module ties them together into a single `AgentError`
//! for callers that cross several boundaries, such as the binary and the
//! per-connection worker. We use `thiserror` for the definitions and
//! `anyhow` only for error propagation in the binary.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::command::DispatchError;
use crate::config::ConfigError;
use crate::server::ServerError;
use crate::transport::BindError;
use crate::wire::DecodeError;

/// Top-level error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Transport configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport endpoint could not be bound
    #[error("Bind error: {0}")]
    Bind(#[from] BindError),

    /// Connection-scoped transport failure
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Incoming bytes did not form a valid message
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Command registration failure
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Server lifecycle failure
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// I/O error outside the categories above
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;

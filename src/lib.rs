//! vigil-agent: local command channel for the Vigil JVM monitoring agent
//!
//! A monitored host runs a long-lived agent process; separate client
//! processes on the same machine send it control requests ("trigger GC",
//! "start profiling") over a local IPC transport. This crate implements
//! that channel: transport selection and binding, incremental message
//! decoding, command dispatch, and the server lifecycle.
//!
//! # Architecture
//!
//! Bytes flow from an accepted connection through the [`channel`] into
//! the [`wire`] decoder until a full request is assembled, are routed by
//! the [`command`] dispatcher to exactly one registered handler, and the
//! handler's response is encoded and written back on the same
//! connection. The transport underneath (UNIX domain socket or Windows
//! named pipe) is chosen once at startup from the [`config`] artifact
//! and invisible above the [`transport`] module.
//!
//! # Modules
//!
//! - `config`: transport properties parsing and validation
//! - `transport`: platform IPC primitives behind one interface
//! - `channel`: framed-agnostic byte channel over one connection
//! - `wire`: message encoding and the incremental decoder
//! - `command`: request/response model, handler trait, dispatcher
//! - `server`: accept loop and lifecycle
//! - `client`: client-side round trips for external control tools
//! - `error`: error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod server;
pub mod transport;
pub mod wire;

// Re-export commonly used types
pub use client::CommandClient;
pub use command::{CommandDispatcher, CommandHandler, Request, Response, ResponseStatus};
pub use config::{TransportConfig, TransportKind};
pub use error::{AgentError, Result};
pub use server::CommandServer;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

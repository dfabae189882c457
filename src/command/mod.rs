//! Command channel request/response model
//!
//! This module defines the unit of work carried by the channel (a command
//! name with a string parameter map), the unit of reply (a status with
//! optional parameters), and the handler trait implemented by plugins.

mod dispatcher;

pub use dispatcher::{CommandDispatcher, DispatchError};

use std::collections::HashMap;

/// A decoded control request: one command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Opaque command identifier supplied by the registering plugin
    pub command_name: String,

    /// Request parameters; keys are unique, insertion order irrelevant
    pub parameters: HashMap<String, String>,

    /// Optional client-chosen correlation id
    pub sequence_id: Option<u64>,
}

impl Request {
    /// Create a request with no parameters.
    pub fn new(command_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.into(),
            parameters: HashMap::new(),
            sequence_id: None,
        }
    }

    /// Add a parameter, replacing any existing value for the key.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the correlation id.
    pub fn with_sequence_id(mut self, sequence_id: u64) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }

    /// Look up a parameter value.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// Outcome of one handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The command was executed
    Ok,
    /// The command failed or was not recognized
    Error,
}

/// Well-known response parameter carrying a human-readable error message
pub const ERROR_MESSAGE_KEY: &str = "error-message";

/// The reply to exactly one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Whether the command succeeded
    pub status: ResponseStatus,

    /// Optional reply parameters
    pub parameters: HashMap<String, String>,
}

impl Response {
    /// Create a successful response with no parameters.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            parameters: HashMap::new(),
        }
    }

    /// Create an error response carrying a message under
    /// [`ERROR_MESSAGE_KEY`].
    pub fn error(message: impl Into<String>) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert(ERROR_MESSAGE_KEY.to_string(), message.into());
        Self {
            status: ResponseStatus::Error,
            parameters,
        }
    }

    /// Add a parameter, replacing any existing value for the key.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// True if the status is [`ResponseStatus::Ok`].
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// A registered command implementation.
///
/// Handlers run synchronously on the connection worker; any asynchronous
/// work a handler needs is its own concern. Implementations must be
/// thread-safe since many connections dispatch concurrently.
pub trait CommandHandler: Send + Sync {
    /// Execute one request and produce its response.
    fn handle(&self, request: &Request) -> Response;
}

impl<F> CommandHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::new("REQUEST_GC")
            .with_parameter("vmId", "42")
            .with_sequence_id(9);

        assert_eq!(request.command_name, "REQUEST_GC");
        assert_eq!(request.parameter("vmId"), Some("42"));
        assert_eq!(request.parameter("missing"), None);
        assert_eq!(request.sequence_id, Some(9));
    }

    #[test]
    fn test_with_parameter_overwrites() {
        let request = Request::new("set")
            .with_parameter("level", "1")
            .with_parameter("level", "2");
        assert_eq!(request.parameter("level"), Some("2"));
        assert_eq!(request.parameters.len(), 1);
    }

    #[test]
    fn test_response_ok() {
        let response = Response::ok().with_parameter("pid", "1234");
        assert!(response.is_ok());
        assert_eq!(response.parameters.get("pid").map(String::as_str), Some("1234"));
    }

    #[test]
    fn test_response_error_carries_message() {
        let response = Response::error("no such VM");
        assert!(!response.is_ok());
        assert_eq!(
            response.parameters.get(ERROR_MESSAGE_KEY).map(String::as_str),
            Some("no such VM")
        );
    }

    #[test]
    fn test_closure_handler() {
        let handler = |request: &Request| {
            Response::ok().with_parameter("echo", request.command_name.clone())
        };
        let response = handler.handle(&Request::new("ping"));
        assert_eq!(response.parameters.get("echo").map(String::as_str), Some("ping"));
    }
}

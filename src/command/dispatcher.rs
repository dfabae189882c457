//! Command dispatcher
//!
//! A registry mapping command names to handler objects. Plugins register
//! and unregister handlers at their own activation time; connection
//! workers read the registry concurrently on every request. Dispatch
//! never fails across this boundary: an unknown command or a misbehaving
//! handler is converted into an ERROR response rather than an error the
//! server would have to recover from.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, error};

use super::{CommandHandler, Request, Response};

/// Errors from registry mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A handler is already registered under this command name
    #[error("Command '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Registry of command handlers keyed by command name
///
/// Read-mostly: many connection workers look up handlers concurrently
/// while registration only happens at plugin activation time.
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl CommandDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    fn read_handlers(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn CommandHandler>>> {
        // A panicking handler cannot poison this lock (dispatch catches
        // unwinds outside the guard), but recover anyway
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_handlers(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn CommandHandler>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a handler under a command name.
    ///
    /// Fails if the name is taken, so two plugins cannot silently shadow
    /// each other.
    pub fn register(
        &self,
        command_name: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), DispatchError> {
        let command_name = command_name.into();
        let mut handlers = self.write_handlers();
        if handlers.contains_key(&command_name) {
            return Err(DispatchError::AlreadyRegistered(command_name));
        }
        debug!("Registered command '{}'", command_name);
        handlers.insert(command_name, handler);
        Ok(())
    }

    /// Remove the handler for a command name; no-op if absent.
    pub fn unregister(&self, command_name: &str) {
        let removed = self.write_handlers().remove(command_name).is_some();
        if removed {
            debug!("Unregistered command '{}'", command_name);
        }
    }

    /// True if a handler is registered under the name.
    pub fn is_registered(&self, command_name: &str) -> bool {
        self.read_handlers().contains_key(command_name)
    }

    /// Route a request to its handler and capture the response.
    ///
    /// An unrecognized command yields an ERROR response, never an error:
    /// a stale or malformed client must not crash the server. A handler
    /// panic is caught here, logged, and surfaced as an ERROR response,
    /// keeping handler failures isolated per-request.
    pub fn dispatch(&self, request: &Request) -> Response {
        let handler = {
            let handlers = self.read_handlers();
            match handlers.get(&request.command_name) {
                Some(handler) => Arc::clone(handler),
                None => {
                    debug!("No handler registered for command '{}'", request.command_name);
                    return Response::error(format!(
                        "unknown command: {}",
                        request.command_name
                    ));
                }
            }
        };

        match catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(response) => response,
            Err(panic) => {
                let reason = panic_message(&panic);
                error!(
                    "Handler for command '{}' panicked: {}",
                    request.command_name, reason
                );
                Response::error(format!(
                    "command '{}' failed: {}",
                    request.command_name, reason
                ))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ResponseStatus;

    fn ok_handler() -> Arc<dyn CommandHandler> {
        Arc::new(|_request: &Request| Response::ok())
    }

    #[test]
    fn test_register_and_dispatch() {
        let dispatcher = CommandDispatcher::new();
        dispatcher
            .register("REQUEST_GC", Arc::new(|request: &Request| {
                Response::ok().with_parameter("vmId", request.parameter("vmId").unwrap_or(""))
            }))
            .unwrap();

        let request = Request::new("REQUEST_GC").with_parameter("vmId", "42");
        let response = dispatcher.dispatch(&request);
        assert!(response.is_ok());
        assert_eq!(response.parameters.get("vmId").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let dispatcher = CommandDispatcher::new();
        dispatcher.register("ping", ok_handler()).unwrap();

        let err = dispatcher.register("ping", ok_handler()).unwrap_err();
        assert_eq!(err, DispatchError::AlreadyRegistered("ping".to_string()));
    }

    #[test]
    fn test_unknown_command_yields_error_response() {
        let dispatcher = CommandDispatcher::new();
        let response = dispatcher.dispatch(&Request::new("NO_SUCH_COMMAND"));
        assert_eq!(response.status, ResponseStatus::Error);
    }

    #[test]
    fn test_unregister_is_noop_when_absent() {
        let dispatcher = CommandDispatcher::new();
        dispatcher.unregister("never-registered");
    }

    #[test]
    fn test_dispatch_after_unregister_behaves_as_unknown() {
        let dispatcher = CommandDispatcher::new();
        dispatcher.register("ping", ok_handler()).unwrap();
        dispatcher.unregister("ping");

        let response = dispatcher.dispatch(&Request::new("ping"));
        assert_eq!(response.status, ResponseStatus::Error);

        // The name is free again after unregistration
        dispatcher.register("ping", ok_handler()).unwrap();
    }

    #[test]
    fn test_handler_panic_is_isolated() {
        let dispatcher = CommandDispatcher::new();
        dispatcher
            .register("explode", Arc::new(|_request: &Request| -> Response {
                panic!("boom");
            }))
            .unwrap();
        dispatcher.register("ping", ok_handler()).unwrap();

        let response = dispatcher.dispatch(&Request::new("explode"));
        assert_eq!(response.status, ResponseStatus::Error);

        // The dispatcher keeps working after a handler panic
        let response = dispatcher.dispatch(&Request::new("ping"));
        assert!(response.is_ok());
    }
}

//! Transport configuration
//!
//! Loads the small properties artifact that selects which transport the
//! command channel runs over and names its endpoint. Loaded once per
//! process and immutable afterwards. Validation failures are distinct,
//! named errors so callers can tell "bad config" from "I/O failure
//! reading config".

mod properties;

pub use properties::parse_properties;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

/// Property key selecting the transport implementation
pub const TYPE_KEY: &str = "type";

/// Property key naming the endpoint
pub const NAME_KEY: &str = "name";

/// Errors raised while loading or validating transport configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration source could not be read at all
    #[error("Failed to read transport configuration '{path}': {source}")]
    Unreadable {
        /// Path of the configuration artifact
        path: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A line was not a comment, blank, or `key=value` pair
    #[error("Malformed property at line {line_number}: '{content}'")]
    MalformedLine {
        /// One-based line number
        line_number: usize,
        /// Offending line content
        content: String,
    },

    /// A required property key was absent
    #[error("Missing required property '{0}'")]
    MissingKey(&'static str),

    /// The `type` property named no known transport
    #[error("Unknown transport type '{0}' (expected 'unix-socket' or 'named-pipe')")]
    UnknownTransportKind(String),

    /// The `name` property was empty
    #[error("Endpoint name cannot be empty")]
    EmptyEndpointName,

    /// The endpoint name contained characters outside `[A-Za-z0-9._-]`
    #[error("Invalid endpoint name '{0}' (only alphanumeric, '.', '_', and '-' allowed)")]
    InvalidEndpointName(String),
}

/// Which OS transport the command channel runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// UNIX domain socket (Linux/macOS)
    UnixSocket,
    /// Named pipe (Windows)
    NamedPipe,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unix-socket" => Ok(TransportKind::UnixSocket),
            "named-pipe" => Ok(TransportKind::NamedPipe),
            other => Err(ConfigError::UnknownTransportKind(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TransportKind::UnixSocket => "unix-socket",
            TransportKind::NamedPipe => "named-pipe",
        };
        write!(f, "{}", value)
    }
}

/// Validated transport selection for the command channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Selected transport implementation
    pub kind: TransportKind,

    /// Endpoint name (socket file name / pipe name), without any
    /// platform path prefix
    pub endpoint_name: String,

    /// Remaining transport-specific properties (e.g. `socket-dir`)
    pub extra: HashMap<String, String>,
}

impl TransportConfig {
    /// Create a configuration from parts, validating the endpoint name.
    pub fn new(kind: TransportKind, endpoint_name: impl Into<String>) -> Result<Self, ConfigError> {
        let endpoint_name = endpoint_name.into();
        validate_endpoint_name(&endpoint_name)?;
        Ok(Self {
            kind,
            endpoint_name,
            extra: HashMap::new(),
        })
    }

    /// Load and validate configuration from a properties file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate configuration from properties text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut properties = parse_properties(text)?;

        let kind = properties
            .remove(TYPE_KEY)
            .ok_or(ConfigError::MissingKey(TYPE_KEY))?
            .parse::<TransportKind>()?;

        let endpoint_name = properties
            .remove(NAME_KEY)
            .ok_or(ConfigError::MissingKey(NAME_KEY))?;
        validate_endpoint_name(&endpoint_name)?;

        Ok(Self {
            kind,
            endpoint_name,
            extra: properties,
        })
    }

    /// Look up a transport-specific property.
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    /// Add a transport-specific property.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Validate an endpoint name (non-empty, limited character set, since it
/// becomes a socket file name or pipe name).
fn validate_endpoint_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyEndpointName);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(ConfigError::InvalidEndpointName(name.to_string()));
    }
    Ok(())
}

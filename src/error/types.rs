//! Error types
//!
//! Defines the errors surfaced by the server core to its callers.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Errors raised while building, configuring or running a server
#[derive(Debug)]
pub enum ServerError {
    /// The server was built without a protocol handler
    MissingProtocol,
    /// No bundled protocol is registered under the given name
    UnknownProtocol(String),
    /// The listener could not be bound to the requested endpoint
    Bind { endpoint: String, source: io::Error },
    /// The listener was bound but its local address could not be read
    LocalAddr(io::Error),
    ConfigError(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::MissingProtocol => write!(f, "A protocol handler is required"),
            ServerError::UnknownProtocol(name) => write!(f, "Unknown protocol: {}", name),
            ServerError::Bind { endpoint, source } => {
                write!(f, "Failed to bind to {}: {}", endpoint, source)
            }
            ServerError::LocalAddr(e) => write!(f, "Failed to read listener address: {}", e),
            ServerError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::LocalAddr(e) => Some(e),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for ServerError {
    fn from(error: config::ConfigError) -> Self {
        ServerError::ConfigError(error.to_string())
    }
}

impl ServerError {
    pub(crate) fn bind(endpoint: impl Into<String>, source: io::Error) -> Self {
        ServerError::Bind {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Returns the endpoint a bind failure refers to, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ServerError::Bind { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }
}

/// Result alias used throughout the server core
pub type Result<T> = std::result::Result<T, ServerError>;

/// Formats a socket address the way log lines refer to peers
pub(crate) fn peer_label(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

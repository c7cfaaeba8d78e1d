//! Transport error taxonomy.
//!
//! Transport failures are never returned from `start`/`stop`. They travel
//! inside [`TransportEvent::Error`](crate::transport::TransportEvent) and are
//! logged where they occur.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {message}")]
    Connect {
        endpoint: String,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("connect to {endpoint} timed out after {after:?}")]
    ConnectTimeout { endpoint: String, after: Duration },

    #[error("bind {endpoint} failed: {message}")]
    Bind {
        endpoint: String,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("accept on {endpoint} failed: {message}")]
    Accept {
        endpoint: String,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("read from {endpoint} failed: {message}")]
    Read {
        endpoint: String,
        kind: io::ErrorKind,
        message: String,
    },
}

impl TransportError {
    pub fn connect(endpoint: &str, err: &io::Error) -> Self {
        Self::Connect {
            endpoint: endpoint.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn bind(endpoint: &str, err: &io::Error) -> Self {
        Self::Bind {
            endpoint: endpoint.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn accept(endpoint: &str, err: &io::Error) -> Self {
        Self::Accept {
            endpoint: endpoint.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn read(endpoint: &str, err: &io::Error) -> Self {
        Self::Read {
            endpoint: endpoint.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only configuration-level failures (bad address, permission) are
    /// considered permanent; the transport still retries them.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectTimeout { .. } => true,
            Self::Connect { kind, .. }
            | Self::Bind { kind, .. }
            | Self::Accept { kind, .. }
            | Self::Read { kind, .. } => !matches!(
                kind,
                io::ErrorKind::InvalidInput
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::AddrNotAvailable
                    | io::ErrorKind::Unsupported
            ),
        }
    }

    /// Short operation label for logs and events.
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout { .. } => "connect",
            Self::Bind { .. } => "bind",
            Self::Accept { .. } => "accept",
            Self::Read { .. } => "read",
        }
    }
}

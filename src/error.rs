//! Typed error hierarchy for gosh-intake
//!
//! Every error type includes context about what went wrong and whether
//! the operation can be retried.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network-related errors (bind, accept, peer I/O)
    #[error("Network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        retryable: bool,
    },

    /// Storage/filesystem errors
    #[error("Storage error at {path:?}: {message}")]
    Storage {
        kind: StorageErrorKind,
        path: PathBuf,
        message: String,
    },

    /// Protocol-level errors (metainfo, magnet, peer handshake)
    #[error("Protocol error: {message}")]
    Protocol {
        kind: ProtocolErrorKind,
        message: String,
    },

    /// Invalid input from user
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// Every candidate listen port failed
    #[error("Failed to bind any of {candidates} candidate port(s)")]
    BindExhausted { candidates: usize },

    /// Download not found
    #[error("Download not found: {0}")]
    NotFound(String),

    /// Download already exists
    #[error("Download already exists: {0}")]
    AlreadyExists(String),

    /// Invalid state transition
    #[error("Invalid state: cannot {action} while {current_state}")]
    InvalidState {
        action: &'static str,
        current_state: String,
    },

    /// Engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Could not bind, listen on, or configure a listening socket
    Bind,
    /// Accepting a pending connection failed
    Accept,
    /// Connection reset
    ConnectionReset,
    /// Connection timeout
    Timeout,
    /// Other network error
    Other,
}

/// Storage error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// File/directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// File already exists
    AlreadyExists,
    /// Invalid path
    InvalidPath,
    /// I/O error
    Io,
}

/// Protocol error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Invalid torrent file
    InvalidTorrent,
    /// Invalid magnet URI
    InvalidMagnet,
    /// Bencode parsing error
    BencodeParse,
    /// Peer protocol violation
    PeerProtocol,
}

impl EngineError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Storage { kind, .. } => matches!(kind, StorageErrorKind::Io),
            _ => false,
        }
    }

    /// Check if this error means a completed download's metadata could not
    /// be interpreted
    pub fn is_metadata_parse_failure(&self) -> bool {
        matches!(
            self,
            Self::Protocol {
                kind: ProtocolErrorKind::InvalidTorrent
                    | ProtocolErrorKind::InvalidMagnet
                    | ProtocolErrorKind::BencodeParse,
                ..
            }
        )
    }

    /// Create a network error
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            NetworkErrorKind::Bind
                | NetworkErrorKind::Accept
                | NetworkErrorKind::Timeout
                | NetworkErrorKind::ConnectionReset
        );
        Self::Network {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Create a storage error
    pub fn storage(
        kind: StorageErrorKind,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self::Storage {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    /// Wrap an I/O error from reading or writing `path`
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let mut converted = Self::from(err);
        if let Self::Storage { path: p, .. } = &mut converted {
            *p = path.into();
        }
        converted
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match err.kind() {
            ErrorKind::NotFound => StorageErrorKind::NotFound,
            ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            ErrorKind::AlreadyExists => StorageErrorKind::AlreadyExists,
            ErrorKind::InvalidInput => StorageErrorKind::InvalidPath,
            _ => StorageErrorKind::Io,
        };
        Self::Storage {
            kind,
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_accept_failures_are_retryable() {
        assert!(EngineError::network(NetworkErrorKind::Bind, "in use").is_retryable());
        assert!(EngineError::network(NetworkErrorKind::Accept, "reset").is_retryable());
        assert!(!EngineError::network(NetworkErrorKind::Other, "?").is_retryable());
        assert!(!EngineError::BindExhausted { candidates: 3 }.is_retryable());
    }

    #[test]
    fn test_metadata_parse_failure_classification() {
        let err = EngineError::protocol(ProtocolErrorKind::InvalidTorrent, "missing info");
        assert!(err.is_metadata_parse_failure());

        let err = EngineError::protocol(ProtocolErrorKind::BencodeParse, "bad marker");
        assert!(err.is_metadata_parse_failure());

        let err = EngineError::protocol(ProtocolErrorKind::PeerProtocol, "bad pstr");
        assert!(!err.is_metadata_parse_failure());
    }

    #[test]
    fn test_from_io_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        match EngineError::from_io(io, "/tmp/x.torrent") {
            EngineError::Storage { kind, path, .. } => {
                assert_eq!(kind, StorageErrorKind::NotFound);
                assert_eq!(path, PathBuf::from("/tmp/x.torrent"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

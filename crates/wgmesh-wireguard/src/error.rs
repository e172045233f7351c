//! Error types for WireGuard key and document operations.

use thiserror::Error;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, WireGuardError>;

/// Errors that can occur during WireGuard key and document operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireGuardError {
    /// Invalid base64 encoding.
    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    /// Invalid key length.
    #[error("invalid key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    /// A directive referenced a peer section that does not exist.
    #[error("no peer section for public key {0}")]
    UnknownPeer(String),

    /// A peer section for this key already exists.
    #[error("duplicate peer section for public key {0}")]
    DuplicatePeer(String),

    /// Configuration text could not be parsed.
    #[error("parse error at line {line}: {message}")]
    ParseError {
        /// Line number (1-based).
        line: usize,
        /// Error description.
        message: String,
    },
}

//! Common error types for Cardsafe.
//!
//! The variants are split along the recovery path a caller has to take:
//! re-prompt for the passphrase (`Decryption`), back off and retry
//! (transient `RemoteUnavailable`), give up (`KeyDerivation`, permission and
//! quota failures) or treat the absence as benign (`NotFound`).

use std::fmt;
use thiserror::Error;

/// Why the object store could not serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteReason {
    /// Connection, DNS or TLS failure before a response arrived.
    Transport,
    /// The transport gave up waiting.
    Timeout,
    /// The store asked us to slow down (HTTP 429 or a rate-limit 403).
    RateLimited,
    /// The store failed internally (HTTP 5xx).
    Server,
    /// The bearer credential was rejected.
    Unauthorized,
    /// The credential lacks the required scope or the object is off limits.
    PermissionDenied,
    /// The user's storage quota is exhausted.
    QuotaExceeded,
}

impl RemoteReason {
    /// Whether retrying the same request later can succeed.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            RemoteReason::Transport
                | RemoteReason::Timeout
                | RemoteReason::RateLimited
                | RemoteReason::Server
        )
    }
}

impl fmt::Display for RemoteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteReason::Transport => "transport failure",
            RemoteReason::Timeout => "timeout",
            RemoteReason::RateLimited => "rate limited",
            RemoteReason::Server => "server error",
            RemoteReason::Unauthorized => "unauthorized",
            RemoteReason::PermissionDenied => "permission denied",
            RemoteReason::QuotaExceeded => "quota exceeded",
        };
        f.write_str(s)
    }
}

/// Top-level error type for Cardsafe operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key derivation pipeline could not produce a key.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Encryption failed before producing an envelope.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Authentication of an envelope failed.
    ///
    /// Wrong passphrase, corrupted ciphertext and tampering all end up here.
    #[error("Decryption failed: wrong passphrase or corrupted data")]
    Decryption,

    /// An envelope could not even be parsed (bad JSON, base64 or field size).
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The remote object store failed or refused the request.
    #[error("Remote store unavailable ({reason}): {message}")]
    RemoteUnavailable {
        reason: RemoteReason,
        message: String,
    },

    /// An expected object is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization of a payload failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No passphrase is held for this vault.
    #[error("Vault is locked")]
    Locked,
}

impl Error {
    /// Shorthand for building a `RemoteUnavailable` error.
    pub fn remote(reason: RemoteReason, message: impl Into<String>) -> Self {
        Error::RemoteUnavailable {
            reason,
            message: message.into(),
        }
    }

    /// Whether the caller may retry the failed operation with backoff.
    ///
    /// Crypto failures are never transient: retrying with the same input
    /// gives the same answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RemoteUnavailable { reason, .. } => reason.is_transient(),
            _ => false,
        }
    }

    /// Whether this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

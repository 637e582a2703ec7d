//! Error types for kvsns
//!
//! Provides a unified error type for namespace, storage backend and
//! KV substrate operations.

use thiserror::Error;

use crate::extstore::CacheState;
use crate::EntryId;

/// Result type alias using KvsnsError
pub type Result<T> = std::result::Result<T, KvsnsError>;

/// Unified error type for kvsns operations
#[derive(Debug, Error)]
pub enum KvsnsError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory {0} is not empty")]
    DirectoryNotEmpty(EntryId),

    #[error("Permission denied")]
    PermissionDenied,

    // -------------------------------------------------------------------------
    // Open File Tracking
    // -------------------------------------------------------------------------
    #[error("Bad handle: owner is not registered on the entry")]
    BadHandle,

    #[error("Too many opens: owner list is full ({limit} owners)")]
    TooManyOpens { limit: usize },

    // -------------------------------------------------------------------------
    // Storage Backend Errors
    // -------------------------------------------------------------------------
    #[error("Illegal HSM transition: cannot {op} an entry in state {from}")]
    IllegalStateTransition { from: CacheState, op: &'static str },

    #[error("Operation not supported by backend: {0}")]
    Unsupported(&'static str),

    #[error("Backend failure: {message}")]
    Backend { message: String, retryable: bool },

    // -------------------------------------------------------------------------
    // Substrate Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted record: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvsnsError {
    /// Build a backend error that callers may retry
    pub fn transient(message: impl Into<String>) -> Self {
        KvsnsError::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a backend error that must not be retried
    pub fn backend(message: impl Into<String>) -> Self {
        KvsnsError::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Check if this error belongs to the transient class retried by block I/O.
    pub fn is_retryable(&self) -> bool {
        match self {
            KvsnsError::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Conventional POSIX error code (Linux numbering) for this error.
    pub fn errno(&self) -> i32 {
        match self {
            KvsnsError::InvalidArgument(_) | KvsnsError::Config(_) => 22, // EINVAL
            KvsnsError::NotFound(_) => 2,                                 // ENOENT
            KvsnsError::AlreadyExists(_) => 17,                           // EEXIST
            KvsnsError::DirectoryNotEmpty(_) => 39,                       // ENOTEMPTY
            KvsnsError::PermissionDenied => 13,                           // EACCES
            KvsnsError::BadHandle => 9,                                   // EBADF
            KvsnsError::TooManyOpens { .. } => 24,                        // EMFILE
            KvsnsError::IllegalStateTransition { .. } => 1,               // EPERM
            KvsnsError::Unsupported(_) => 95,                             // EOPNOTSUPP
            KvsnsError::Io(e) => e.raw_os_error().unwrap_or(5),
            KvsnsError::Backend { retryable: true, .. } => 11, // EAGAIN
            KvsnsError::Backend { .. }
            | KvsnsError::WalCorruption(_)
            | KvsnsError::Serialization(_)
            | KvsnsError::Corrupted(_) => 5, // EIO
        }
    }
}

impl From<bincode::Error> for KvsnsError {
    fn from(err: bincode::Error) -> Self {
        KvsnsError::Serialization(err.to_string())
    }
}

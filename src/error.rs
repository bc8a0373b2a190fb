//! Error types for aliasdb.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific failure conditions and provides clear messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::record::RecordId;

/// Errors raised by a [`RecordStore`](crate::store::RecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file does not exist and the open mode forbids creating it.
    #[error("store file not found: {path}")]
    NotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// None of the candidate deserializers accepted the input.
    #[error("file not in a recognized format: {path}")]
    UnrecognizedFormat {
        /// Path whose contents could not be parsed.
        path: PathBuf,
    },

    /// Serialization or the temporary-file write failed during `sync`.
    ///
    /// The original file is guaranteed untouched and the temporary file
    /// has been removed; the caller may retry.
    #[error("write to {path} failed: {reason}")]
    WriteFailure {
        /// Target path of the failed sync.
        path: PathBuf,
        /// What went wrong, in display form.
        reason: String,
    },

    /// A mutating operation was attempted on a read-only store.
    #[error("store is read-only: {path}")]
    PermissionDenied {
        /// Path of the read-only store.
        path: PathBuf,
    },

    /// The backing file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Top-level error type for aliasdb.
///
/// This enum encompasses all errors that can occur when using the
/// identity registry or its underlying stores.
#[derive(Debug, Error)]
pub enum Error {
    /// A failure in one of the underlying record stores.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A key resolved to neither a known id nor a known alias.
    #[error("no such id or alias: {key:?}")]
    NotFound {
        /// The key that failed to resolve.
        key: String,
    },

    /// A merge was requested between a record and itself.
    #[error("cannot merge record {id} into itself")]
    SelfMerge {
        /// The id named by both merge keys.
        id: RecordId,
    },
}

impl Error {
    /// Creates a `NotFound` error for the given lookup key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns true if this error is a failed id/alias resolution.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Store(StoreError::NotFound { .. })
        )
    }
}

/// Result type alias for aliasdb operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the storage layer.
//!
//! [`StoreError`] covers failures that affect the whole data file.
//! [`EntryError`] covers a single malformed entry; the loader reports it
//! and moves on to the next one.

use std::path::PathBuf;

use fatigue_types::IdError;

/// Errors that can occur reading or writing the data file as a whole.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file or directory being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The file parsed as JSON but is not an object keyed by entity id.
    #[error("Malformed data file: {0}")]
    Malformed(String),
}

/// Errors that fail a single persisted entry.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// The key is not a usable entity id.
    #[error("invalid entity id {raw:?}: {source}")]
    InvalidId {
        /// The raw key as found in the file.
        raw: String,
        /// Why it was rejected.
        source: IdError,
    },

    /// `SecondsActive` is absent or not a number.
    #[error("entry {id} has no numeric SecondsActive")]
    MissingSeconds {
        /// The entry key.
        id: String,
    },

    /// `Timestamp` is absent or of a type that cannot carry an instant.
    #[error("entry {id} timestamp is unsupported type: {kind}")]
    UnsupportedTimestamp {
        /// The entry key.
        id: String,
        /// The JSON kind that was found instead.
        kind: &'static str,
    },

    /// `Timestamp` is a string but not an ISO-8601 instant.
    #[error("entry {id} timestamp {value:?} is not ISO-8601: {source}")]
    InvalidTimestamp {
        /// The entry key.
        id: String,
        /// The raw string.
        value: String,
        /// The underlying parse error.
        source: chrono::ParseError,
    },
}

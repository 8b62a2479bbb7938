//! Error types for the meshdrive core.

use thiserror::Error;

/// Errors raised by namespace, registry and sync operations.
///
/// Namespace errors (`NotFound`, `NotADirectory`, `InvalidArgument`,
/// `AlreadyRegistered`, `Unsupported`) are raised synchronously from the call
/// that detects them and represent usage errors, not transient conditions.
/// `Crdt`, `Storage` and `Transport` wrap failures from the underlying
/// layers.
#[derive(Debug, Error)]
pub enum DriveError {
    /// A path segment does not exist in its parent directory.
    #[error("No entry \"{entry}\" in \"{dir}\"")]
    NotFound {
        /// The missing segment.
        entry: String,
        /// The directory that was searched (namespace-relative, `""` = root).
        dir: String,
    },

    /// A non-terminal path segment resolved to a file marker.
    #[error("Entry \"{entry}\" in \"{dir}\" is not a directory")]
    NotADirectory {
        /// The offending segment.
        entry: String,
        /// The directory containing it.
        dir: String,
    },

    /// The operation is not valid for the given argument (e.g. deleting or
    /// moving the namespace root).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A document factory is already registered for the content type.
    #[error("A document factory for content type \"{0}\" is already registered")]
    AlreadyRegistered(String),

    /// The operation is intentionally not implemented.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A CRDT encode/decode/apply failure.
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// A classic-storage or offline-cache failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DriveError>;

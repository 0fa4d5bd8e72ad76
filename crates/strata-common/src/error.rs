//! Unified error types for the Strata workspace.
//!
//! Library crates return [`StrataError`]; binaries wrap it in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StrataError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Persisted JSON metadata could not be decoded.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// File holding the malformed content.
        path: PathBuf,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// Metadata could not be encoded to JSON.
    #[error("failed to encode metadata: {source}")]
    Encode {
        /// Underlying encode error.
        source: serde_json::Error,
    },

    /// The base-image list reported by the layering primitive is malformed.
    #[error("failed to decode shared base images: {source}")]
    BaseImages {
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// A call into the layering primitive failed.
    #[error("layer primitive {operation} failed for {id}: {message}")]
    Primitive {
        /// Primitive operation that failed.
        operation: &'static str,
        /// Layer the operation addressed.
        id: String,
        /// Description reported by the primitive.
        message: String,
    },

    /// The parent layer directory vanished while a child was being created.
    #[error("cannot create layer with missing parent {parent}: {source}")]
    MissingParent {
        /// Logical ID of the missing parent.
        parent: String,
        /// Error returned when probing the parent directory.
        source: std::io::Error,
    },

    /// A writable layer was requested without any ancestor chain.
    #[error("cannot create a read/write layer without a parent layer")]
    ReadWriteWithoutParent,

    /// The operation is not supported by this driver.
    #[error("the layer filter driver does not support {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The image/tag registry rejected an operation.
    #[error("image registry error: {message}")]
    Registry {
        /// Description of the rejected operation.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },
}

impl StrataError {
    /// Builds an [`StrataError::Io`] from a path and an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`StrataError::Primitive`] for the given operation and layer.
    pub fn primitive(
        operation: &'static str,
        id: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Primitive {
            operation,
            id: id.into(),
            message: message.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StrataError>;

//! Error types for Holdfast core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Holdfast core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backing store error.
    #[error("storage error: {0}")]
    Storage(#[from] holdfast_storage::StorageError),

    /// Blob codec error.
    #[error("codec error: {0}")]
    Codec(#[from] holdfast_codec::CodecError),

    /// The store could not be restored from the backing database.
    ///
    /// This is distinct from a normal empty store: it means the backing
    /// store exists but cannot be read.
    #[error("failed to restore store: {message}")]
    RestoreFailed {
        /// Description of the failure.
        message: String,
    },

    /// Identity-key migration failed.
    ///
    /// Fatal: a partial key rewrite would corrupt cross-references
    /// between entities, holders, and invalidation markers.
    #[error("identity-key migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// The schema does not define this kind.
    #[error("unknown entity kind: {name}")]
    UnknownKind {
        /// The kind name that was not found.
        name: String,
    },

    /// A field id is not defined for the kind.
    #[error("unknown field {field} on kind {kind}")]
    UnknownField {
        /// The kind name.
        kind: String,
        /// The offending field id.
        field: u16,
    },

    /// The entity's kind has no identity fields.
    #[error("kind {kind} is not identifiable")]
    NotIdentifiable {
        /// The kind name.
        kind: String,
    },

    /// The schema failed validation.
    #[error("invalid schema: {message}")]
    SchemaInvalid {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The storage engine has been closed.
    #[error("storage engine is closed")]
    EngineClosed,
}

impl CoreError {
    /// Creates a restore failure error.
    pub fn restore_failed(message: impl Into<String>) -> Self {
        Self::RestoreFailed {
            message: message.into(),
        }
    }

    /// Creates a migration failure error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates a schema validation error.
    pub fn schema_invalid(message: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

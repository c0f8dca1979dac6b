//! Storage error types.

use std::io;
use thiserror::Error;

use crate::events::Veto;

/// Error raised by a structured-content importer.
pub type ImportError = Box<dyn std::error::Error + Send + Sync>;

/// Broad category of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The path did not satisfy the operation's existence/kind requirement.
    Precondition,
    /// The underlying physical operation failed.
    Io,
    /// A change checker rejected the mutation before it was applied.
    Vetoed,
    /// Unique-name generation ran out of attempts.
    Exhausted,
    /// The backend does not implement the operation.
    Unsupported,
    /// Structured import of an entry failed.
    Import,
    /// The configuration could not be loaded or applied.
    Config,
}

/// Storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Expected an entry.
    #[error("not an entry: {0}")]
    NotAnEntry(String),

    /// Expected a container.
    #[error("not a container: {0}")]
    NotAContainer(String),

    /// Path cannot be used for this operation (e.g. renaming the root).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Physical operation failed.
    #[error("{op} failed for '{path}'")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    /// A checker rejected the change.
    #[error("change to '{path}' vetoed")]
    Vetoed {
        path: String,
        #[source]
        veto: Veto,
    },

    /// No unused name was found.
    #[error("no unique name for '{prefix}…{suffix}' in '{container}' after {attempts} attempts")]
    Exhausted {
        container: String,
        prefix: String,
        suffix: String,
        attempts: usize,
    },

    /// Operation not provided by this backend.
    #[error("{op} is not supported by {backend}")]
    Unsupported {
        op: &'static str,
        backend: String,
    },

    /// Importer failure.
    #[error("import of '{path}' failed")]
    Import {
        path: String,
        #[source]
        source: ImportError,
    },

    /// Configuration problem.
    #[error("configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotAnEntry error.
    pub fn not_an_entry(path: impl Into<String>) -> Self {
        Self::NotAnEntry(path.into())
    }

    /// Create a NotAContainer error.
    pub fn not_a_container(path: impl Into<String>) -> Self {
        Self::NotAContainer(path.into())
    }

    /// Wrap an I/O error with the operation and logical path that failed.
    ///
    /// An `AlreadyExists` I/O error becomes [`StorageError::AlreadyExists`]:
    /// the exclusive create is the authority on conflicts, not the earlier
    /// existence check.
    pub fn io(op: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            _ => Self::Io { op, path, source },
        }
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(op: &'static str, backend: impl Into<String>) -> Self {
        Self::Unsupported {
            op,
            backend: backend.into(),
        }
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::NotAnEntry(_)
            | Self::NotAContainer(_)
            | Self::InvalidPath(_) => ErrorKind::Precondition,
            Self::Io { .. } => ErrorKind::Io,
            Self::Vetoed { .. } => ErrorKind::Vetoed,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Import { .. } => ErrorKind::Import,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns true for precondition violations.
    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }
}

/// Convert StorageError to std::io::Error for `Read`/`Write` interop.
impl From<StorageError> for io::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            StorageError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            StorageError::NotAnEntry(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            StorageError::NotAContainer(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            StorageError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            StorageError::Io { source, .. } => source,
            StorageError::Unsupported { .. } => io::Error::new(io::ErrorKind::Unsupported, e),
            StorageError::Vetoed { .. } => io::Error::new(io::ErrorKind::PermissionDenied, e),
            other => io::Error::other(other),
        }
    }
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

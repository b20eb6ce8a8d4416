// src/error.rs

use crate::validation::ValidationError;
use thiserror::Error;

/// Core error types for Libvault
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed ubername such as `Foo.Bar-1` or `Foo Bar-1.0`
    #[error("Invalid library identity '{text}', expected something like '{example}'")]
    InvalidIdentityFormat { text: String, example: String },

    /// Machine name with characters outside `[A-Za-z0-9_.]`
    #[error("Invalid machine name: {0}")]
    InvalidMachineName(String),

    /// Non-numeric or out-of-range version component
    #[error("Invalid version number '{value}' for {field}")]
    InvalidVersion { field: &'static str, value: String },

    /// Aggregated validation problems from a pipeline run
    #[error("Validation failed: {0}")]
    Validation(ValidationError),

    /// A declared dependency is not installed
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// A file referenced by the manifest is absent from staging
    #[error("Library {library} is missing required file: {path}")]
    MissingRequiredFile { library: String, path: String },

    /// Lock for a library could not be acquired in time
    #[error("Timed out waiting for install lock on '{0}'")]
    InstallLockTimeout(String),

    /// Install or upgrade failed while writing to the repository
    #[error("Failed to install {library} (rolled back: {rolled_back}): {source}")]
    InstallFailed {
        library: String,
        rolled_back: bool,
        #[source]
        source: Box<Error>,
    },

    /// Rollback could not remove a partially written library
    ///
    /// `cause` is the commit failure that triggered the rollback.
    #[error("Rollback of {library} after '{cause}' failed, repository may be inconsistent: {source}")]
    RollbackFailed {
        library: String,
        cause: Box<Error>,
        #[source]
        source: Box<Error>,
    },

    /// Relative path that is absolute or escapes the library directory
    #[error("Invalid library file path: {0}")]
    InvalidPath(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or metadata (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage initialization error
    #[error("Failed to initialize storage: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),
}

impl Error {
    /// Whether the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::InstallLockTimeout(_))
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

/// Result type alias using Libvault's Error type
pub type Result<T> = std::result::Result<T, Error>;

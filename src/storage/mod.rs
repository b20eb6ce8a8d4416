// src/storage/mod.rs

//! Storage backends for installed libraries
//!
//! Every library lives under a *library key* (its hyphen ubername, e.g.
//! `Foo.Bar-1.0`) and consists of a set of files addressed by relative
//! path plus one metadata record. The metadata record is written last during
//! an install: a library without metadata is invisible to queries.
//!
//! Backends:
//! - [`FileSystemStorage`]: one directory per library under a root
//! - [`MemoryStorage`]: in-process, for tests and embedding
//! - [`crate::db::SqliteStorage`]: a single SQLite database

mod fs;
mod memory;

pub use fs::FileSystemStorage;
pub use memory::MemoryStorage;

use crate::error::{Error, Result};
use crate::library::{InstalledLibrary, MANIFEST_FILE};
use async_trait::async_trait;
use std::path::{Component, Path};

/// Byte-blob storage keyed by library and relative path
#[async_trait]
pub trait LibraryStorage: Send + Sync {
    /// Write (create or overwrite) a file of a library
    async fn write(&self, library_key: &str, relative_path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a payload file, `None` if it does not exist
    ///
    /// The metadata record is never returned here; use `read_metadata`.
    async fn read(&self, library_key: &str, relative_path: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether a file exists
    async fn exists(&self, library_key: &str, relative_path: &str) -> Result<bool>;

    /// List all files of a library, sorted, excluding the metadata record
    async fn list(&self, library_key: &str) -> Result<Vec<String>>;

    /// Remove a library entirely, files and metadata. Removing an absent
    /// library is not an error.
    async fn delete(&self, library_key: &str) -> Result<()>;

    /// Remove a single file of a library
    async fn delete_file(&self, library_key: &str, relative_path: &str) -> Result<()>;

    /// Keys of all libraries that have a metadata record, sorted
    async fn list_libraries(&self) -> Result<Vec<String>>;

    /// Read the metadata record, `None` if the library is not installed
    async fn read_metadata(&self, library_key: &str) -> Result<Option<InstalledLibrary>>;

    /// Write the metadata record, marking the library as installed
    async fn write_metadata(&self, library_key: &str, library: &InstalledLibrary) -> Result<()>;
}

/// Reject absolute paths and `..` components
pub fn validate_relative_path(relative_path: &str) -> Result<()> {
    let path = Path::new(relative_path);

    if relative_path.is_empty() {
        return Err(Error::InvalidPath(relative_path.to_string()));
    }

    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || relative_path.contains('\\') {
        return Err(Error::InvalidPath(relative_path.to_string()));
    }

    Ok(())
}

/// Paths a caller may write or delete; the manifest is owned by the
/// metadata record
pub(crate) fn validate_payload_path(relative_path: &str) -> Result<()> {
    validate_relative_path(relative_path)?;
    if relative_path == MANIFEST_FILE {
        return Err(Error::InvalidPath(relative_path.to_string()));
    }
    Ok(())
}

/// Library keys become directory names, so they get the same treatment
pub(crate) fn validate_library_key(library_key: &str) -> Result<()> {
    let valid = !library_key.is_empty()
        && !library_key.starts_with('.')
        && library_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' '));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(library_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_validation() {
        assert!(validate_relative_path("js/app.js").is_ok());
        assert!(validate_relative_path("language/de.json").is_ok());

        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("../other/file.js").is_err());
        assert!(validate_relative_path("js/../../x").is_err());
        assert!(validate_relative_path("./js/app.js").is_err());
        assert!(validate_relative_path("js\\app.js").is_err());
        assert!(validate_relative_path(MANIFEST_FILE).is_ok());
        assert!(validate_payload_path(MANIFEST_FILE).is_err());
        assert!(validate_payload_path("js/app.js").is_ok());
    }

    #[test]
    fn test_library_key_validation() {
        assert!(validate_library_key("Foo.Bar-1.0").is_ok());
        assert!(validate_library_key("..").is_err());
        assert!(validate_library_key("a/b").is_err());
        assert!(validate_library_key("").is_err());
    }
}

// src/db/storage.rs

//! SQLite-backed library storage
//!
//! rusqlite is synchronous, so every call runs on the blocking pool with the
//! connection behind a mutex.

use super::models::{LibraryFile, LibraryRow};
use crate::error::{Error, Result};
use crate::library::InstalledLibrary;
use crate::storage::{LibraryStorage, validate_payload_path, validate_relative_path};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Libraries stored in a single SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Initialize (if needed) and open the database at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        super::init(db_path)?;
        let conn = super::open(db_path)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already migrated connection
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::InitError("database connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Recompute content hashes of a library's files
    ///
    /// Returns the paths whose stored content no longer matches its hash.
    pub async fn verify(&self, library_key: &str) -> Result<Vec<String>> {
        let key = library_key.to_string();
        let corrupted = self
            .with_conn(move |conn| {
                Ok(LibraryFile::find_by_library(conn, &key)?
                    .into_iter()
                    .filter(|file| !file.is_intact())
                    .map(|file| file.path)
                    .collect::<Vec<_>>())
            })
            .await?;

        for path in &corrupted {
            warn!("Integrity check failed for {}/{}", library_key, path);
        }
        Ok(corrupted)
    }
}

#[async_trait]
impl LibraryStorage for SqliteStorage {
    async fn write(&self, library_key: &str, relative_path: &str, bytes: &[u8]) -> Result<()> {
        validate_payload_path(relative_path)?;
        let mut file = LibraryFile::new(
            library_key.to_string(),
            relative_path.to_string(),
            bytes.to_vec(),
        );
        debug!("Storing {}/{} ({} bytes)", library_key, relative_path, file.size);
        self.with_conn(move |conn| file.upsert(conn).map(|_| ())).await
    }

    async fn read(&self, library_key: &str, relative_path: &str) -> Result<Option<Vec<u8>>> {
        validate_relative_path(relative_path)?;
        let (key, path) = (library_key.to_string(), relative_path.to_string());
        self.with_conn(move |conn| Ok(LibraryFile::find(conn, &key, &path)?.map(|f| f.content)))
            .await
    }

    async fn exists(&self, library_key: &str, relative_path: &str) -> Result<bool> {
        validate_relative_path(relative_path)?;
        let (key, path) = (library_key.to_string(), relative_path.to_string());
        self.with_conn(move |conn| LibraryFile::exists(conn, &key, &path))
            .await
    }

    async fn list(&self, library_key: &str) -> Result<Vec<String>> {
        let key = library_key.to_string();
        self.with_conn(move |conn| LibraryFile::list_paths(conn, &key))
            .await
    }

    async fn delete(&self, library_key: &str) -> Result<()> {
        let key = library_key.to_string();
        self.with_conn(move |conn| {
            super::transaction(conn, |tx| {
                LibraryRow::delete(tx, &key)?;
                LibraryFile::delete_by_library(tx, &key)
            })
        })
        .await
    }

    async fn delete_file(&self, library_key: &str, relative_path: &str) -> Result<()> {
        validate_payload_path(relative_path)?;
        let (key, path) = (library_key.to_string(), relative_path.to_string());
        self.with_conn(move |conn| LibraryFile::delete(conn, &key, &path))
            .await
    }

    async fn list_libraries(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| LibraryRow::list_keys(conn)).await
    }

    async fn read_metadata(&self, library_key: &str) -> Result<Option<InstalledLibrary>> {
        let key = library_key.to_string();
        self.with_conn(move |conn| {
            LibraryRow::find_by_key(conn, &key)?
                .map(|row| row.to_library())
                .transpose()
        })
        .await
    }

    async fn write_metadata(&self, library_key: &str, library: &InstalledLibrary) -> Result<()> {
        let row = LibraryRow::from_library(library_key, library)?;
        self.with_conn(move |conn| row.upsert(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryIdentity;
    use tempfile::TempDir;

    fn create_test_storage() -> (TempDir, SqliteStorage) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("libvault.db");
        let storage = SqliteStorage::open(db_path.to_str().unwrap()).unwrap();
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_sqlite_storage_lifecycle() {
        let (_temp, storage) = create_test_storage();
        let lib = InstalledLibrary::new(LibraryIdentity::new("Foo.Bar", 1, 0).unwrap(), 1, "Foo");

        storage.write("Foo.Bar-1.0", "js/a.js", b"a").await.unwrap();
        assert!(storage.list_libraries().await.unwrap().is_empty());

        storage.write_metadata("Foo.Bar-1.0", &lib).await.unwrap();
        assert_eq!(storage.list_libraries().await.unwrap(), vec!["Foo.Bar-1.0"]);
        assert_eq!(storage.read_metadata("Foo.Bar-1.0").await.unwrap(), Some(lib));
        assert_eq!(
            storage.read("Foo.Bar-1.0", "js/a.js").await.unwrap(),
            Some(b"a".to_vec())
        );
        assert!(storage.verify("Foo.Bar-1.0").await.unwrap().is_empty());

        storage.delete("Foo.Bar-1.0").await.unwrap();
        assert!(storage.list("Foo.Bar-1.0").await.unwrap().is_empty());
        assert!(storage.read_metadata("Foo.Bar-1.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_reports_tampered_files() {
        let (_temp, storage) = create_test_storage();
        storage.write("Foo-1.0", "a.js", b"a").await.unwrap();
        storage.write("Foo-1.0", "b.js", b"b").await.unwrap();

        storage
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE library_files SET content = x'00' WHERE path = 'b.js'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(storage.verify("Foo-1.0").await.unwrap(), vec!["b.js"]);
    }
}

// src/db/models.rs

//! Data models for Libvault database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, updating, and deleting records.

use crate::error::Result;
use crate::library::InstalledLibrary;
use rusqlite::{Connection, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// An installed library row; the full record is kept as JSON in `metadata`
#[derive(Debug, Clone)]
pub struct LibraryRow {
    pub library_key: String,
    pub machine_name: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub patch_version: u32,
    pub title: String,
    pub runnable: bool,
    pub metadata: String,
    pub installed_at: Option<String>,
    pub updated_at: Option<String>,
}

impl LibraryRow {
    /// Build a row from a library record
    pub fn from_library(library_key: &str, library: &InstalledLibrary) -> Result<Self> {
        Ok(Self {
            library_key: library_key.to_string(),
            machine_name: library.identity.machine_name.clone(),
            major_version: library.identity.major_version,
            minor_version: library.identity.minor_version,
            patch_version: library.patch_version,
            title: library.title.clone(),
            runnable: library.runnable,
            metadata: serde_json::to_string(library)?,
            installed_at: None,
            updated_at: None,
        })
    }

    /// Decode the metadata record
    pub fn to_library(&self) -> Result<InstalledLibrary> {
        InstalledLibrary::from_json(self.metadata.as_bytes())
    }

    /// Insert this row, or replace the record of an existing library
    ///
    /// `installed_at` is preserved across upgrades; `updated_at` is set
    /// whenever an existing row is replaced.
    pub fn upsert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO libraries
                (library_key, machine_name, major_version, minor_version, patch_version, title, runnable, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(library_key) DO UPDATE SET
                patch_version = excluded.patch_version,
                title = excluded.title,
                runnable = excluded.runnable,
                metadata = excluded.metadata,
                updated_at = CURRENT_TIMESTAMP",
            params![
                &self.library_key,
                &self.machine_name,
                self.major_version,
                self.minor_version,
                self.patch_version,
                &self.title,
                self.runnable,
                &self.metadata,
            ],
        )?;
        Ok(())
    }

    /// Find a library by key
    pub fn find_by_key(conn: &Connection, library_key: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT library_key, machine_name, major_version, minor_version, patch_version,
                    title, runnable, metadata, installed_at, updated_at
             FROM libraries WHERE library_key = ?1",
        )?;

        let row = stmt.query_row([library_key], Self::from_row).optional()?;

        Ok(row)
    }

    /// Keys of all installed libraries
    pub fn list_keys(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT library_key FROM libraries ORDER BY library_key")?;

        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(keys)
    }

    /// Delete a library row
    pub fn delete(conn: &Connection, library_key: &str) -> Result<()> {
        conn.execute("DELETE FROM libraries WHERE library_key = ?1", [library_key])?;
        Ok(())
    }

    /// Convert a database row to a LibraryRow
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            library_key: row.get(0)?,
            machine_name: row.get(1)?,
            major_version: row.get(2)?,
            minor_version: row.get(3)?,
            patch_version: row.get(4)?,
            title: row.get(5)?,
            runnable: row.get(6)?,
            metadata: row.get(7)?,
            installed_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

/// A payload file of a library
#[derive(Debug, Clone)]
pub struct LibraryFile {
    pub id: Option<i64>,
    pub library_key: String,
    pub path: String,
    pub sha256_hash: String,
    pub size: i64,
    pub content: Vec<u8>,
    pub stored_at: Option<String>,
}

impl LibraryFile {
    /// Create a new LibraryFile, hashing its content
    pub fn new(library_key: String, path: String, content: Vec<u8>) -> Self {
        Self {
            id: None,
            library_key,
            path,
            sha256_hash: sha256_hex(&content),
            size: content.len() as i64,
            content,
            stored_at: None,
        }
    }

    /// Insert this file, replacing any previous content at the same path
    pub fn upsert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO library_files (library_key, path, sha256_hash, size, content)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(library_key, path) DO UPDATE SET
                sha256_hash = excluded.sha256_hash,
                size = excluded.size,
                content = excluded.content,
                stored_at = CURRENT_TIMESTAMP",
            params![
                &self.library_key,
                &self.path,
                &self.sha256_hash,
                self.size,
                &self.content,
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM library_files WHERE library_key = ?1 AND path = ?2",
            params![&self.library_key, &self.path],
            |row| row.get(0),
        )?;
        self.id = Some(id);
        Ok(id)
    }

    /// Find a file by library and path
    pub fn find(conn: &Connection, library_key: &str, path: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, library_key, path, sha256_hash, size, content, stored_at
             FROM library_files WHERE library_key = ?1 AND path = ?2",
        )?;

        let file = stmt
            .query_row(params![library_key, path], Self::from_row)
            .optional()?;

        Ok(file)
    }

    /// Check whether a file exists without loading its content
    pub fn exists(conn: &Connection, library_key: &str, path: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM library_files WHERE library_key = ?1 AND path = ?2",
            params![library_key, path],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All file paths of a library, sorted
    pub fn list_paths(conn: &Connection, library_key: &str) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT path FROM library_files WHERE library_key = ?1 ORDER BY path")?;

        let paths = stmt
            .query_map([library_key], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(paths)
    }

    /// All files of a library, with content
    pub fn find_by_library(conn: &Connection, library_key: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, library_key, path, sha256_hash, size, content, stored_at
             FROM library_files WHERE library_key = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([library_key], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Delete one file
    pub fn delete(conn: &Connection, library_key: &str, path: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM library_files WHERE library_key = ?1 AND path = ?2",
            params![library_key, path],
        )?;
        Ok(())
    }

    /// Delete every file of a library
    pub fn delete_by_library(conn: &Connection, library_key: &str) -> Result<()> {
        conn.execute("DELETE FROM library_files WHERE library_key = ?1", [library_key])?;
        Ok(())
    }

    /// Whether the stored content still matches the stored hash
    pub fn is_intact(&self) -> bool {
        sha256_hex(&self.content) == self.sha256_hash && self.content.len() as i64 == self.size
    }

    /// Convert a database row to a LibraryFile
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            library_key: row.get(1)?,
            path: row.get(2)?,
            sha256_hash: row.get(3)?,
            size: row.get(4)?,
            content: row.get(5)?,
            stored_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::library::LibraryIdentity;
    use tempfile::NamedTempFile;

    fn create_test_db() -> (NamedTempFile, Connection) {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();
        schema::migrate(&conn).unwrap();
        (temp_file, conn)
    }

    fn sample_library(patch: u32) -> InstalledLibrary {
        let mut lib =
            InstalledLibrary::new(LibraryIdentity::new("Foo.Bar", 1, 0).unwrap(), patch, "Foo Bar");
        lib.runnable = true;
        lib
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_library_row_crud() {
        let (_temp, conn) = create_test_db();

        let row = LibraryRow::from_library("Foo.Bar-1.0", &sample_library(2)).unwrap();
        row.upsert(&conn).unwrap();

        let found = LibraryRow::find_by_key(&conn, "Foo.Bar-1.0").unwrap().unwrap();
        assert_eq!(found.patch_version, 2);
        assert!(found.runnable);
        assert!(found.installed_at.is_some());
        assert!(found.updated_at.is_none());
        assert_eq!(found.to_library().unwrap(), sample_library(2));

        // Upgrade in place
        let row = LibraryRow::from_library("Foo.Bar-1.0", &sample_library(3)).unwrap();
        row.upsert(&conn).unwrap();
        let found = LibraryRow::find_by_key(&conn, "Foo.Bar-1.0").unwrap().unwrap();
        assert_eq!(found.patch_version, 3);
        assert!(found.updated_at.is_some());

        assert_eq!(LibraryRow::list_keys(&conn).unwrap(), vec!["Foo.Bar-1.0"]);

        LibraryRow::delete(&conn, "Foo.Bar-1.0").unwrap();
        assert!(LibraryRow::find_by_key(&conn, "Foo.Bar-1.0").unwrap().is_none());
    }

    #[test]
    fn test_library_file_crud() {
        let (_temp, conn) = create_test_db();

        let mut file = LibraryFile::new("Foo-1.0".to_string(), "js/a.js".to_string(), b"a".to_vec());
        let id = file.upsert(&conn).unwrap();
        assert!(id > 0);

        let mut replaced =
            LibraryFile::new("Foo-1.0".to_string(), "js/a.js".to_string(), b"bb".to_vec());
        assert_eq!(replaced.upsert(&conn).unwrap(), id);

        let found = LibraryFile::find(&conn, "Foo-1.0", "js/a.js").unwrap().unwrap();
        assert_eq!(found.content, b"bb");
        assert_eq!(found.size, 2);
        assert!(found.is_intact());

        LibraryFile::new("Foo-1.0".to_string(), "css/a.css".to_string(), b"c".to_vec())
            .upsert(&conn)
            .unwrap();
        assert_eq!(
            LibraryFile::list_paths(&conn, "Foo-1.0").unwrap(),
            vec!["css/a.css", "js/a.js"]
        );
        assert!(LibraryFile::exists(&conn, "Foo-1.0", "css/a.css").unwrap());

        LibraryFile::delete(&conn, "Foo-1.0", "css/a.css").unwrap();
        assert!(!LibraryFile::exists(&conn, "Foo-1.0", "css/a.css").unwrap());

        LibraryFile::delete_by_library(&conn, "Foo-1.0").unwrap();
        assert!(LibraryFile::find_by_library(&conn, "Foo-1.0").unwrap().is_empty());
    }

    #[test]
    fn test_tampered_file_is_not_intact() {
        let (_temp, conn) = create_test_db();
        LibraryFile::new("Foo-1.0".to_string(), "a.js".to_string(), b"a".to_vec())
            .upsert(&conn)
            .unwrap();
        conn.execute("UPDATE library_files SET content = x'7a'", []).unwrap();

        let file = LibraryFile::find(&conn, "Foo-1.0", "a.js").unwrap().unwrap();
        assert!(!file.is_intact());
    }
}

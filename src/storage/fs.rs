// src/storage/fs.rs

//! Local filesystem backend
//!
//! Layout: `<root>/<library key>/<relative path>`, with the metadata record
//! stored as `<root>/<library key>/library.json`.

use super::{LibraryStorage, validate_library_key, validate_payload_path, validate_relative_path};
use crate::error::{Error, Result};
use crate::library::{InstalledLibrary, MANIFEST_FILE};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// Libraries stored as plain directories under a root
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Open (and create if needed) a repository rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            Error::InitError(format!(
                "Failed to create repository directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn library_dir(&self, library_key: &str) -> Result<PathBuf> {
        validate_library_key(library_key)?;
        Ok(self.root.join(library_key))
    }

    fn file_path(&self, library_key: &str, relative_path: &str) -> Result<PathBuf> {
        validate_relative_path(relative_path)?;
        Ok(self.library_dir(library_key)?.join(relative_path))
    }
}

/// Write to a sibling temp file, then rename over the destination
async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dest.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp_path, bytes).await?;
    if let Err(e) = fs::rename(&temp_path, dest).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

fn not_found_as_none<T>(result: io::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl LibraryStorage for FileSystemStorage {
    async fn write(&self, library_key: &str, relative_path: &str, bytes: &[u8]) -> Result<()> {
        validate_payload_path(relative_path)?;
        let dest = self.file_path(library_key, relative_path)?;
        debug!("Writing {} ({} bytes)", dest.display(), bytes.len());
        write_atomic(&dest, bytes).await
    }

    async fn read(&self, library_key: &str, relative_path: &str) -> Result<Option<Vec<u8>>> {
        let path = self.file_path(library_key, relative_path)?;
        // The metadata record shares the directory but is not a payload file
        if relative_path == MANIFEST_FILE {
            return Ok(None);
        }
        not_found_as_none(fs::read(&path).await)
    }

    async fn exists(&self, library_key: &str, relative_path: &str) -> Result<bool> {
        let path = self.file_path(library_key, relative_path)?;
        if relative_path == MANIFEST_FILE {
            return Ok(false);
        }
        Ok(fs::try_exists(&path).await? && fs::metadata(&path).await?.is_file())
    }

    async fn list(&self, library_key: &str) -> Result<Vec<String>> {
        let dir = self.library_dir(library_key)?;
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let files = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut files = Vec::new();
            for entry in WalkDir::new(&dir).min_depth(1) {
                let entry = entry.map_err(io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&dir)
                    .map_err(|e| Error::InvalidPath(e.to_string()))?;
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let name = entry.file_name().to_string_lossy();
                let is_temp = name.starts_with('.') && name.ends_with(".tmp");
                if relative != MANIFEST_FILE && !is_temp {
                    files.push(relative);
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(files)
    }

    async fn delete(&self, library_key: &str) -> Result<()> {
        let dir = self.library_dir(library_key)?;
        debug!("Removing library directory {}", dir.display());
        match fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn delete_file(&self, library_key: &str, relative_path: &str) -> Result<()> {
        validate_payload_path(relative_path)?;
        let library_dir = self.library_dir(library_key)?;
        let path = library_dir.join(relative_path);

        match fs::remove_file(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        // Prune directories left empty, never the library directory itself
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == library_dir || !dir.starts_with(&library_dir) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            parent = dir.parent();
        }
        Ok(())
    }

    async fn list_libraries(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().into_owned();
            if fs::try_exists(entry.path().join(MANIFEST_FILE)).await? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn read_metadata(&self, library_key: &str) -> Result<Option<InstalledLibrary>> {
        let path = self.library_dir(library_key)?.join(MANIFEST_FILE);
        match not_found_as_none(fs::read(&path).await)? {
            Some(bytes) => Ok(Some(InstalledLibrary::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_metadata(&self, library_key: &str, library: &InstalledLibrary) -> Result<()> {
        let path = self.library_dir(library_key)?.join(MANIFEST_FILE);
        write_atomic(&path, &library.to_json()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryIdentity;
    use tempfile::TempDir;

    async fn create_test_storage() -> (TempDir, FileSystemStorage) {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::open(temp_dir.path().join("libraries"))
            .await
            .unwrap();
        (temp_dir, storage)
    }

    fn sample_library() -> InstalledLibrary {
        InstalledLibrary::new(LibraryIdentity::new("Foo.Bar", 1, 0).unwrap(), 2, "Foo Bar")
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let (_temp, storage) = create_test_storage().await;

        storage.write("Foo.Bar-1.0", "js/foo.js", b"var a;").await.unwrap();
        storage.write("Foo.Bar-1.0", "css/foo.css", b"a{}").await.unwrap();

        assert_eq!(
            storage.read("Foo.Bar-1.0", "js/foo.js").await.unwrap(),
            Some(b"var a;".to_vec())
        );
        assert!(storage.read("Foo.Bar-1.0", "js/missing.js").await.unwrap().is_none());
        assert!(storage.exists("Foo.Bar-1.0", "css/foo.css").await.unwrap());
        assert!(!storage.exists("Foo.Bar-1.0", "js").await.unwrap());

        let files = storage.list("Foo.Bar-1.0").await.unwrap();
        assert_eq!(files, vec!["css/foo.css", "js/foo.js"]);
        assert!(storage.list("Other-1.0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_marks_library_installed() {
        let (_temp, storage) = create_test_storage().await;
        let lib = sample_library();

        storage.write("Foo.Bar-1.0", "js/foo.js", b"x").await.unwrap();
        assert!(storage.list_libraries().await.unwrap().is_empty());
        assert!(storage.read_metadata("Foo.Bar-1.0").await.unwrap().is_none());

        storage.write_metadata("Foo.Bar-1.0", &lib).await.unwrap();
        assert_eq!(storage.list_libraries().await.unwrap(), vec!["Foo.Bar-1.0"]);
        assert_eq!(storage.read_metadata("Foo.Bar-1.0").await.unwrap(), Some(lib));

        // The metadata record is not visible as a payload file
        assert_eq!(storage.list("Foo.Bar-1.0").await.unwrap(), vec!["js/foo.js"]);
        assert!(storage.read("Foo.Bar-1.0", MANIFEST_FILE).await.unwrap().is_none());
        assert!(!storage.exists("Foo.Bar-1.0", MANIFEST_FILE).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_delete_file() {
        let (_temp, storage) = create_test_storage().await;
        storage.write("Foo.Bar-1.0", "js/deep/a.js", b"a").await.unwrap();
        storage.write("Foo.Bar-1.0", "b.js", b"b").await.unwrap();
        storage.write_metadata("Foo.Bar-1.0", &sample_library()).await.unwrap();

        storage.delete_file("Foo.Bar-1.0", "js/deep/a.js").await.unwrap();
        assert_eq!(storage.list("Foo.Bar-1.0").await.unwrap(), vec!["b.js"]);
        assert!(!storage.root().join("Foo.Bar-1.0/js").exists());

        storage.delete("Foo.Bar-1.0").await.unwrap();
        assert!(storage.list_libraries().await.unwrap().is_empty());
        assert!(!storage.root().join("Foo.Bar-1.0").exists());

        // Deleting again is a no-op
        storage.delete("Foo.Bar-1.0").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let (_temp, storage) = create_test_storage().await;
        assert!(matches!(
            storage.write("Foo.Bar-1.0", "../escape.js", b"x").await,
            Err(Error::InvalidPath(_))
        ));
        assert!(storage.write("../Foo", "a.js", b"x").await.is_err());
        assert!(storage.write("Foo.Bar-1.0", MANIFEST_FILE, b"{}").await.is_err());
    }
}

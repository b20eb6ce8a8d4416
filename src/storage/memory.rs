// src/storage/memory.rs

//! In-process backend

use super::{LibraryStorage, validate_payload_path, validate_relative_path};
use crate::error::Result;
use crate::library::InstalledLibrary;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct StoredLibrary {
    files: BTreeMap<String, Vec<u8>>,
    metadata: Option<InstalledLibrary>,
}

/// Libraries held in memory; contents are lost when dropped
#[derive(Debug, Default)]
pub struct MemoryStorage {
    libraries: RwLock<BTreeMap<String, StoredLibrary>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryStorage for MemoryStorage {
    async fn write(&self, library_key: &str, relative_path: &str, bytes: &[u8]) -> Result<()> {
        validate_payload_path(relative_path)?;
        self.libraries
            .write()
            .await
            .entry(library_key.to_string())
            .or_default()
            .files
            .insert(relative_path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, library_key: &str, relative_path: &str) -> Result<Option<Vec<u8>>> {
        validate_relative_path(relative_path)?;
        Ok(self
            .libraries
            .read()
            .await
            .get(library_key)
            .and_then(|lib| lib.files.get(relative_path).cloned()))
    }

    async fn exists(&self, library_key: &str, relative_path: &str) -> Result<bool> {
        validate_relative_path(relative_path)?;
        Ok(self
            .libraries
            .read()
            .await
            .get(library_key)
            .is_some_and(|lib| lib.files.contains_key(relative_path)))
    }

    async fn list(&self, library_key: &str) -> Result<Vec<String>> {
        Ok(self
            .libraries
            .read()
            .await
            .get(library_key)
            .map(|lib| lib.files.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, library_key: &str) -> Result<()> {
        self.libraries.write().await.remove(library_key);
        Ok(())
    }

    async fn delete_file(&self, library_key: &str, relative_path: &str) -> Result<()> {
        validate_payload_path(relative_path)?;
        if let Some(lib) = self.libraries.write().await.get_mut(library_key) {
            lib.files.remove(relative_path);
        }
        Ok(())
    }

    async fn list_libraries(&self) -> Result<Vec<String>> {
        Ok(self
            .libraries
            .read()
            .await
            .iter()
            .filter(|(_, lib)| lib.metadata.is_some())
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn read_metadata(&self, library_key: &str) -> Result<Option<InstalledLibrary>> {
        Ok(self
            .libraries
            .read()
            .await
            .get(library_key)
            .and_then(|lib| lib.metadata.clone()))
    }

    async fn write_metadata(&self, library_key: &str, library: &InstalledLibrary) -> Result<()> {
        self.libraries
            .write()
            .await
            .entry(library_key.to_string())
            .or_default()
            .metadata = Some(library.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryIdentity;

    #[tokio::test]
    async fn test_files_without_metadata_are_not_listed() {
        let storage = MemoryStorage::new();
        storage.write("Foo-1.0", "a.js", b"a").await.unwrap();
        assert!(storage.list_libraries().await.unwrap().is_empty());
        assert_eq!(storage.list("Foo-1.0").await.unwrap(), vec!["a.js"]);

        let lib = InstalledLibrary::new(LibraryIdentity::new("Foo", 1, 0).unwrap(), 0, "Foo");
        storage.write_metadata("Foo-1.0", &lib).await.unwrap();
        assert_eq!(storage.list_libraries().await.unwrap(), vec!["Foo-1.0"]);

        storage.delete_file("Foo-1.0", "a.js").await.unwrap();
        assert!(!storage.exists("Foo-1.0", "a.js").await.unwrap());

        storage.delete("Foo-1.0").await.unwrap();
        assert!(storage.read_metadata("Foo-1.0").await.unwrap().is_none());
    }
}

// src/repository/mod.rs

//! Read-side queries over installed libraries
//!
//! This module provides functionality for:
//! - Checking whether a library version is installed
//! - Enumerating installed versions, optionally per machine name
//! - Listing and reading library files
//! - Looking up semantics and translations, with "not localized" fallback
//!
//! Absence is never an error here: lookups return `None` or an empty list.
//! Backend failures propagate unchanged.

use crate::error::Result;
use crate::library::{
    DependencyKinds, InstalledLibrary, LANGUAGE_DIR, LibraryIdentity, SEMANTICS_FILE,
    SeparatorPolicy, language_file,
};
use crate::storage::LibraryStorage;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Query facade over a [`LibraryStorage`]
#[derive(Clone)]
pub struct LibraryRepository {
    storage: Arc<dyn LibraryStorage>,
}

impl fmt::Debug for LibraryRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryRepository").finish_non_exhaustive()
    }
}

impl LibraryRepository {
    pub fn new(storage: Arc<dyn LibraryStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn LibraryStorage> {
        &self.storage
    }

    /// Whether this exact major.minor is installed
    pub async fn exists(&self, identity: &LibraryIdentity) -> Result<bool> {
        Ok(self.get(identity).await?.is_some())
    }

    /// Metadata record of an installed library
    pub async fn get(&self, identity: &LibraryIdentity) -> Result<Option<InstalledLibrary>> {
        self.storage.read_metadata(&identity.library_key()).await
    }

    /// All installed libraries, optionally only versions of one machine name,
    /// sorted by machine name then version
    pub async fn list_installed(&self, machine_name: Option<&str>) -> Result<Vec<InstalledLibrary>> {
        let mut libraries = Vec::new();

        for key in self.storage.list_libraries().await? {
            let identity = match LibraryIdentity::parse(&key, SeparatorPolicy::HYPHEN) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Skipping unrecognized library key '{}': {}", key, e);
                    continue;
                }
            };

            if machine_name.is_some_and(|name| name != identity.machine_name) {
                continue;
            }

            if let Some(library) = self.storage.read_metadata(&key).await? {
                if library.identity != identity {
                    warn!(
                        "Library record under '{}' describes {}, ignoring",
                        key, library.identity
                    );
                    continue;
                }
                libraries.push(library);
            }
        }

        libraries.sort_by(|a, b| {
            a.identity
                .machine_name
                .cmp(&b.identity.machine_name)
                .then_with(|| a.version().cmp(&b.version()))
        });
        debug!("Found {} installed libraries", libraries.len());
        Ok(libraries)
    }

    /// Installed versions sharing machine name and major version
    pub async fn find_by_machine_major(
        &self,
        machine_name: &str,
        major_version: u32,
    ) -> Result<Vec<InstalledLibrary>> {
        Ok(self
            .list_installed(Some(machine_name))
            .await?
            .into_iter()
            .filter(|lib| lib.identity.major_version == major_version)
            .collect())
    }

    /// Files of an installed library, including translations
    pub async fn list_files(&self, identity: &LibraryIdentity) -> Result<Vec<String>> {
        if !self.exists(identity).await? {
            return Ok(Vec::new());
        }
        self.storage.list(&identity.library_key()).await
    }

    pub async fn file_exists(&self, identity: &LibraryIdentity, path: &str) -> Result<bool> {
        self.storage.exists(&identity.library_key(), path).await
    }

    pub async fn read_file(&self, identity: &LibraryIdentity, path: &str) -> Result<Option<Vec<u8>>> {
        self.storage.read(&identity.library_key(), path).await
    }

    /// Parsed `semantics.json`, if the library ships one
    pub async fn get_semantics(&self, identity: &LibraryIdentity) -> Result<Option<serde_json::Value>> {
        match self.read_file(identity, SEMANTICS_FILE).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Language codes with a translation file, sorted
    pub async fn list_languages(&self, identity: &LibraryIdentity) -> Result<Vec<String>> {
        let prefix = format!("{}/", LANGUAGE_DIR);
        Ok(self
            .list_files(identity)
            .await?
            .iter()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .filter_map(|name| name.strip_suffix(".json"))
            .map(str::to_string)
            .collect())
    }

    /// Translation for `code`, `None` when the library is not localized
    pub async fn get_language(&self, identity: &LibraryIdentity, code: &str) -> Result<Option<String>> {
        if code.is_empty() || code.contains(['/', '\\']) || code.starts_with('.') {
            return Ok(None);
        }
        Ok(self
            .read_file(identity, &language_file(code))
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Installed libraries that declare `identity` as a dependency
    pub async fn dependents(
        &self,
        identity: &LibraryIdentity,
        kinds: DependencyKinds,
    ) -> Result<Vec<InstalledLibrary>> {
        Ok(self
            .list_installed(None)
            .await?
            .into_iter()
            .filter(|lib| lib.dependencies(kinds).any(|dep| dep == identity))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn id(name: &str, major: u32, minor: u32) -> LibraryIdentity {
        LibraryIdentity::new(name, major, minor).unwrap()
    }

    async fn install(storage: &MemoryStorage, lib: &InstalledLibrary, files: &[&str]) {
        for file in files {
            storage.write(&lib.library_key(), file, b"{}").await.unwrap();
        }
        storage.write_metadata(&lib.library_key(), lib).await.unwrap();
    }

    async fn create_test_repository() -> LibraryRepository {
        let storage = MemoryStorage::new();

        let mut question = InstalledLibrary::new(id("H5P.Question", 1, 5), 3, "Question");
        question.preloaded_dependencies = vec![id("H5P.JoubelUI", 1, 3)];
        install(
            &storage,
            &question,
            &["js/question.js", "language/de.json", "language/nb.json", "semantics.json"],
        )
        .await;

        install(&storage, &InstalledLibrary::new(id("H5P.JoubelUI", 1, 3), 9, "Joubel UI"), &[]).await;
        install(&storage, &InstalledLibrary::new(id("H5P.Question", 1, 4), 0, "Question"), &[]).await;
        install(&storage, &InstalledLibrary::new(id("H5P.Question", 2, 0), 0, "Question"), &[]).await;

        // Files without metadata: an interrupted install
        storage.write("H5P.Broken-1.0", "a.js", b"x").await.unwrap();

        LibraryRepository::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_list_installed_sorted_and_filtered() {
        let repo = create_test_repository().await;

        let all: Vec<String> = repo
            .list_installed(None)
            .await
            .unwrap()
            .iter()
            .map(|lib| lib.identity.to_string())
            .collect();
        assert_eq!(
            all,
            vec!["H5P.JoubelUI-1.3", "H5P.Question-1.4", "H5P.Question-1.5", "H5P.Question-2.0"]
        );

        assert_eq!(repo.list_installed(Some("H5P.Question")).await.unwrap().len(), 3);
        assert_eq!(repo.find_by_machine_major("H5P.Question", 1).await.unwrap().len(), 2);
        assert!(repo.list_installed(Some("H5P.Broken")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exists_requires_metadata() {
        let repo = create_test_repository().await;
        assert!(repo.exists(&id("H5P.Question", 1, 5)).await.unwrap());
        assert!(!repo.exists(&id("H5P.Question", 1, 6)).await.unwrap());
        assert!(!repo.exists(&id("H5P.Broken", 1, 0)).await.unwrap());
        assert!(repo.list_files(&id("H5P.Broken", 1, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files_semantics_and_languages() {
        let repo = create_test_repository().await;
        let question = id("H5P.Question", 1, 5);

        assert_eq!(repo.list_files(&question).await.unwrap().len(), 4);
        assert!(repo.file_exists(&question, "js/question.js").await.unwrap());
        assert_eq!(
            repo.get_semantics(&question).await.unwrap(),
            Some(serde_json::json!({}))
        );
        assert!(repo.get_semantics(&id("H5P.JoubelUI", 1, 3)).await.unwrap().is_none());

        assert_eq!(repo.list_languages(&question).await.unwrap(), vec!["de", "nb"]);
        assert_eq!(repo.get_language(&question, "de").await.unwrap().as_deref(), Some("{}"));
        assert!(repo.get_language(&question, "fr").await.unwrap().is_none());
        assert!(repo.get_language(&question, "../de").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dependents() {
        let repo = create_test_repository().await;
        let dependents = repo
            .dependents(&id("H5P.JoubelUI", 1, 3), DependencyKinds::ALL)
            .await
            .unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].identity, id("H5P.Question", 1, 5));
    }
}

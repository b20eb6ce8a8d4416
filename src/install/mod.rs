// src/install/mod.rs

//! Installing and upgrading libraries in the repository
//!
//! One call to [`InstallCoordinator::install`] handles exactly one staged
//! library:
//!
//! ```text
//! Requested -> LockAcquired -> Skipped
//!                           -> FreshInstall -> Committed | RolledBack
//!                           -> Upgrading    -> Committed | RolledBack
//! ```
//!
//! The lock keyed by machine name covers the decision and the commit, so two
//! concurrent attempts can never both see "not installed". The metadata record
//! is written after every payload file; until then the library is invisible
//! to queries. Any failure during commit deletes the library key entirely.

mod staging;

pub use staging::{StagedLibrary, discover};

use crate::error::{Error, Result};
use crate::library::{InstalledLibrary, LibraryIdentity, validate_machine_name};
use crate::lock::{LockHandle, LockProvider};
use crate::repository::LibraryRepository;
use crate::storage::LibraryStorage;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stage of one install attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Requested,
    LockAcquired,
    Skipped,
    FreshInstall,
    Upgrading,
    Committed,
    RolledBack,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallState::Requested => "requested",
            InstallState::LockAcquired => "lock-acquired",
            InstallState::Skipped => "skipped",
            InstallState::FreshInstall => "fresh-install",
            InstallState::Upgrading => "upgrading",
            InstallState::Committed => "committed",
            InstallState::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// What an install attempt did to the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallAction {
    Installed,
    Upgraded { previous_patch: u32 },
    /// An equal or newer patch was already present
    Skipped { installed_patch: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub library: LibraryIdentity,
    pub patch_version: u32,
    pub action: InstallAction,
    pub files_written: usize,
    pub stale_files_removed: Vec<String>,
}

impl InstallReport {
    fn skipped(staged: &StagedLibrary, installed_patch: u32) -> Self {
        Self {
            library: staged.metadata.identity.clone(),
            patch_version: staged.metadata.patch_version,
            action: InstallAction::Skipped { installed_patch },
            files_written: 0,
            stale_files_removed: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.action, InstallAction::Skipped { .. })
    }
}

/// Serializes installs per machine name and keeps storage consistent
#[derive(Clone)]
pub struct InstallCoordinator {
    storage: Arc<dyn LibraryStorage>,
    repository: LibraryRepository,
    locks: Arc<dyn LockProvider>,
    max_occupation: Duration,
}

impl fmt::Debug for InstallCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallCoordinator")
            .field("max_occupation", &self.max_occupation)
            .finish_non_exhaustive()
    }
}

impl InstallCoordinator {
    pub fn new(
        storage: Arc<dyn LibraryStorage>,
        locks: Arc<dyn LockProvider>,
        max_occupation: Duration,
    ) -> Self {
        let repository = LibraryRepository::new(Arc::clone(&storage));
        Self {
            storage,
            repository,
            locks,
            max_occupation,
        }
    }

    pub fn repository(&self) -> &LibraryRepository {
        &self.repository
    }

    /// Installed library that `candidate` would patch
    ///
    /// Same machine name, major and minor version with a lower patch. Lets
    /// callers skip the lock when nothing needs doing.
    pub async fn is_patched_version(
        &self,
        candidate: &InstalledLibrary,
    ) -> Result<Option<InstalledLibrary>> {
        Ok(self
            .repository
            .get(&candidate.identity)
            .await?
            .filter(|installed| installed.patch_version < candidate.patch_version))
    }

    /// Whether the newest installed version with the same machine name and
    /// major version is older than `candidate`
    ///
    /// False when nothing of that major version is installed.
    pub async fn has_upgrade(&self, candidate: &InstalledLibrary) -> Result<bool> {
        let newest = self
            .repository
            .find_by_machine_major(candidate.machine_name(), candidate.identity.major_version)
            .await?
            .into_iter()
            .map(|installed| installed.version())
            .max();

        Ok(newest.is_some_and(|newest| newest < candidate.version()))
    }

    /// Install, upgrade or skip one staged library
    pub async fn install(&self, staged: &StagedLibrary) -> Result<InstallReport> {
        let identity = &staged.metadata.identity;
        validate_machine_name(&identity.machine_name)?;
        self.transition(identity, InstallState::Requested);

        let handle = self
            .locks
            .acquire(identity.machine_name.as_str(), self.max_occupation)
            .await?;
        self.transition(identity, InstallState::LockAcquired);

        let result = self.install_locked(staged).await;
        self.release(handle).await;
        result
    }

    /// Remove an installed library; returns whether it was present
    pub async fn remove(&self, identity: &LibraryIdentity) -> Result<bool> {
        let handle = self
            .locks
            .acquire(identity.machine_name.as_str(), self.max_occupation)
            .await?;

        let result = self.remove_locked(identity).await;
        self.release(handle).await;
        result
    }

    async fn remove_locked(&self, identity: &LibraryIdentity) -> Result<bool> {
        let key = identity.library_key();
        let present = self.storage.read_metadata(&key).await?.is_some()
            || !self.storage.list(&key).await?.is_empty();
        if present {
            self.storage.delete(&key).await?;
            info!("Removed {}", identity);
        }
        Ok(present)
    }

    async fn release(&self, handle: LockHandle) {
        let name = handle.name().to_string();
        if let Err(e) = self.locks.release(handle).await {
            // The storage work is already done; the provider expires the lock
            error!("Failed to release install lock '{}': {}", name, e);
        }
    }

    fn transition(&self, identity: &LibraryIdentity, state: InstallState) {
        debug!("{}: {}", identity, state);
    }

    async fn install_locked(&self, staged: &StagedLibrary) -> Result<InstallReport> {
        let identity = &staged.metadata.identity;
        let candidate_patch = staged.metadata.patch_version;

        let existing = self.repository.get(identity).await?;
        let state = match &existing {
            None => InstallState::FreshInstall,
            Some(installed) if installed.patch_version >= candidate_patch => {
                self.transition(identity, InstallState::Skipped);
                info!(
                    "{} patch {} already installed (candidate patch {}), skipping",
                    identity, installed.patch_version, candidate_patch
                );
                return Ok(InstallReport::skipped(staged, installed.patch_version));
            }
            Some(_) => InstallState::Upgrading,
        };
        self.transition(identity, state);

        check_consistency(staged)?;

        let key = identity.library_key();
        match self.commit(staged, existing.is_some()).await {
            Ok((files_written, stale_files_removed)) => {
                self.transition(identity, InstallState::Committed);
                let action = match existing {
                    Some(previous) => {
                        info!(
                            "Upgraded {} from patch {} to {}",
                            identity, previous.patch_version, candidate_patch
                        );
                        InstallAction::Upgraded {
                            previous_patch: previous.patch_version,
                        }
                    }
                    None => {
                        info!("Installed {} patch {}", identity, candidate_patch);
                        InstallAction::Installed
                    }
                };
                Ok(InstallReport {
                    library: identity.clone(),
                    patch_version: candidate_patch,
                    action,
                    files_written,
                    stale_files_removed,
                })
            }
            Err(source) => {
                warn!("Commit of {} failed: {}, rolling back", identity, source);
                if let Err(rollback) = self.storage.delete(&key).await {
                    error!(
                        "Rollback of {} failed, repository may be inconsistent: {}",
                        identity, rollback
                    );
                    return Err(Error::RollbackFailed {
                        library: key,
                        cause: Box::new(source),
                        source: Box::new(rollback),
                    });
                }
                self.transition(identity, InstallState::RolledBack);
                Err(Error::InstallFailed {
                    library: key,
                    rolled_back: true,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Copy payload, write metadata, then prune files the new version dropped
    async fn commit(&self, staged: &StagedLibrary, upgrading: bool) -> Result<(usize, Vec<String>)> {
        let key = staged.metadata.library_key();
        let previous_files = if upgrading {
            self.storage.list(&key).await?
        } else {
            Vec::new()
        };

        let mut written = 0;
        for path in staged.payload_files() {
            let bytes = tokio::fs::read(staged.path_of(path)).await?;
            self.storage.write(&key, path, &bytes).await?;
            written += 1;
        }

        self.storage.write_metadata(&key, &staged.metadata).await?;

        let current: HashSet<&str> = staged.payload_files().collect();
        let mut removed = Vec::new();
        for stale in previous_files {
            if current.contains(stale.as_str()) {
                continue;
            }
            self.storage.delete_file(&key, &stale).await?;
            debug!("Removed stale file {}/{}", key, stale);
            removed.push(stale);
        }

        Ok((written, removed))
    }
}

/// Every file the manifest requires must be staged before anything is written
fn check_consistency(staged: &StagedLibrary) -> Result<()> {
    match staged.missing_files().into_iter().next() {
        Some(path) => Err(Error::MissingRequiredFile {
            library: staged.metadata.library_key(),
            path,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockProvider;
    use crate::storage::MemoryStorage;
    use std::path::Path;
    use tempfile::TempDir;

    fn id() -> LibraryIdentity {
        LibraryIdentity::new("Foo.Bar", 1, 0).unwrap()
    }

    fn stage(dir: &Path, patch: u32, files: &[(&str, &str)]) -> StagedLibrary {
        let root = dir.join(format!("patch-{}", patch));
        let mut metadata = InstalledLibrary::new(id(), patch, "Foo");
        metadata.preloaded_js = vec!["js/foo.js".to_string()];

        let mut names = vec!["library.json".to_string()];
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("library.json"), metadata.to_json().unwrap()).unwrap();
        for (path, contents) in files {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, contents).unwrap();
            names.push(path.to_string());
        }
        StagedLibrary::new(root, metadata, names)
    }

    fn create_coordinator() -> (Arc<MemoryStorage>, InstallCoordinator) {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = InstallCoordinator::new(
            storage.clone(),
            Arc::new(MemoryLockProvider::default()),
            Duration::from_secs(10),
        );
        (storage, coordinator)
    }

    #[tokio::test]
    async fn test_fresh_install_then_skip() {
        let temp = TempDir::new().unwrap();
        let (storage, coordinator) = create_coordinator();
        let staged = stage(temp.path(), 2, &[("js/foo.js", "v2")]);

        let report = coordinator.install(&staged).await.unwrap();
        assert_eq!(report.action, InstallAction::Installed);
        assert_eq!(report.files_written, 1);
        assert_eq!(storage.list("Foo.Bar-1.0").await.unwrap(), vec!["js/foo.js"]);

        let again = coordinator.install(&stage(temp.path(), 1, &[("js/foo.js", "v1")])).await.unwrap();
        assert_eq!(again.action, InstallAction::Skipped { installed_patch: 2 });
        assert!(again.is_skipped());
        assert_eq!(
            storage.read("Foo.Bar-1.0", "js/foo.js").await.unwrap(),
            Some(b"v2".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_required_file_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let (storage, coordinator) = create_coordinator();
        let staged = stage(temp.path(), 1, &[("js/other.js", "")]);

        let err = coordinator.install(&staged).await.unwrap_err();
        assert!(matches!(err, Error::MissingRequiredFile { ref path, .. } if path == "js/foo.js"));
        assert!(storage.list_libraries().await.unwrap().is_empty());
        assert!(storage.list("Foo.Bar-1.0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patched_version_and_upgrade_checks() {
        let temp = TempDir::new().unwrap();
        let (_storage, coordinator) = create_coordinator();
        let v2 = stage(temp.path(), 2, &[("js/foo.js", "")]);

        assert!(!coordinator.has_upgrade(&v2.metadata).await.unwrap());
        assert!(coordinator.is_patched_version(&v2.metadata).await.unwrap().is_none());

        coordinator.install(&v2).await.unwrap();

        let mut v3 = v2.metadata.clone();
        v3.patch_version = 3;
        assert_eq!(
            coordinator
                .is_patched_version(&v3)
                .await
                .unwrap()
                .map(|lib| lib.patch_version),
            Some(2)
        );
        assert!(coordinator.has_upgrade(&v3).await.unwrap());
        assert!(!coordinator.has_upgrade(&v2.metadata).await.unwrap());

        let mut next_minor = InstalledLibrary::new(LibraryIdentity::new("Foo.Bar", 1, 1).unwrap(), 0, "Foo");
        next_minor.preloaded_js = v3.preloaded_js.clone();
        assert!(coordinator.has_upgrade(&next_minor).await.unwrap());
        assert!(coordinator.is_patched_version(&next_minor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let temp = TempDir::new().unwrap();
        let (storage, coordinator) = create_coordinator();
        coordinator
            .install(&stage(temp.path(), 1, &[("js/foo.js", "")]))
            .await
            .unwrap();

        assert!(coordinator.remove(&id()).await.unwrap());
        assert!(!coordinator.remove(&id()).await.unwrap());
        assert!(storage.list_libraries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_machine_name_is_never_committed() {
        let temp = TempDir::new().unwrap();
        let (storage, coordinator) = create_coordinator();
        let mut staged = stage(temp.path(), 1, &[("js/foo.js", "")]);
        staged.metadata.identity.machine_name = "Foo Bar".to_string();

        let err = coordinator.install(&staged).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMachineName(ref name) if name == "Foo Bar"));
        assert!(storage.list_libraries().await.unwrap().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(InstallState::FreshInstall.to_string(), "fresh-install");
        assert_eq!(InstallState::RolledBack.to_string(), "rolled-back");
    }
}

// src/install/staging.rs

//! Extracted library directories awaiting installation
//!
//! A package archive is unpacked elsewhere; what arrives here is a directory
//! holding one sub-directory per library, each with its `library.json`.

use crate::error::{Error, Result};
use crate::library::{InstalledLibrary, MANIFEST_FILE};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A library directory plus its parsed manifest
#[derive(Debug, Clone, PartialEq)]
pub struct StagedLibrary {
    /// Directory holding the library files
    pub root: PathBuf,
    /// Parsed `library.json`
    pub metadata: InstalledLibrary,
    /// Every file under `root`, relative, `/`-separated, sorted
    pub files: Vec<String>,
}

impl StagedLibrary {
    pub fn new(root: impl Into<PathBuf>, metadata: InstalledLibrary, mut files: Vec<String>) -> Self {
        files.sort();
        files.dedup();
        Self {
            root: root.into(),
            metadata,
            files,
        }
    }

    /// Read the manifest and enumerate the files of a staged directory
    pub async fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest = root.join(MANIFEST_FILE);

        let bytes = match tokio::fs::read(&manifest).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MissingRequiredFile {
                    library: root.display().to_string(),
                    path: MANIFEST_FILE.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = InstalledLibrary::from_json(&bytes)?;

        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        debug!(
            "Staged {} from {} ({} files)",
            metadata.identity,
            root.display(),
            files.len()
        );
        Ok(Self::new(root, metadata, files))
    }

    /// Name of the staging directory, used to cross-check the manifest
    pub fn directory_name(&self) -> Option<&str> {
        self.root.file_name().and_then(|name| name.to_str())
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.files.binary_search_by(|f| f.as_str().cmp(relative_path)).is_ok()
    }

    /// Absolute path of a staged file
    pub fn path_of(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    /// Files the manifest requires that staging does not contain
    pub fn missing_files(&self) -> Vec<String> {
        self.metadata
            .required_files()
            .into_iter()
            .filter(|path| !self.contains(path))
            .collect()
    }

    /// Payload files, i.e. everything except the manifest
    pub fn payload_files(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .map(String::as_str)
            .filter(|path| *path != MANIFEST_FILE)
    }
}

fn collect_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;

        let parts: Vec<&str> = relative
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .ok_or_else(|| Error::InvalidPath(relative.display().to_string()))
            })
            .collect::<Result<_>>()?;
        files.push(parts.join("/"));
    }

    files.sort();
    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Library directories directly under an extracted package
///
/// A directory counts when it holds a `library.json`. Results are sorted by
/// directory name.
pub async fn discover(package_root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(package_root).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_hidden(&entry.file_name()) || !entry.file_type().await?.is_dir() {
            continue;
        }
        if tokio::fs::try_exists(path.join(MANIFEST_FILE)).await? {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}

// src/resolver/mod.rs

//! Dependency resolution over installed libraries
//!
//! Expands a set of root libraries into everything they need, breadth first.
//! A visited set keyed by ubername makes cycles terminate and keeps each
//! library in the result at most once.

use crate::error::{Error, Result};
use crate::library::{DependencyKinds, InstalledLibrary, LibraryIdentity};
use crate::repository::LibraryRepository;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Knobs for one resolution
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Which dependency declarations to follow
    pub kinds: DependencyKinds,
    /// Libraries to leave out of the result, along with their dependencies
    /// unless reachable some other way
    pub exclude: Vec<LibraryIdentity>,
    /// Skip dependencies that are not installed instead of failing
    pub allow_missing: bool,
}

impl ResolveOptions {
    pub fn with_kinds(kinds: DependencyKinds) -> Self {
        Self {
            kinds,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    repository: LibraryRepository,
}

impl DependencyResolver {
    pub fn new(repository: LibraryRepository) -> Self {
        Self { repository }
    }

    /// Roots plus their transitive dependencies, in breadth-first order
    ///
    /// Roots come first in the order given. A library that is not installed
    /// fails with [`Error::MissingDependency`] unless `allow_missing` is set.
    pub async fn resolve(
        &self,
        roots: &[LibraryIdentity],
        options: &ResolveOptions,
    ) -> Result<Vec<InstalledLibrary>> {
        let mut visited: HashSet<String> =
            options.exclude.iter().map(LibraryIdentity::library_key).collect();
        let mut queue: VecDeque<LibraryIdentity> = roots.iter().cloned().collect();
        let mut resolved = Vec::new();

        while let Some(identity) = queue.pop_front() {
            let key = identity.library_key();
            if visited.contains(&key) {
                continue;
            }

            let Some(library) = self.repository.get(&identity).await? else {
                if options.allow_missing {
                    warn!("Dependency {} is not installed, skipping", identity);
                    visited.insert(key);
                    continue;
                }
                return Err(Error::MissingDependency(key));
            };

            visited.insert(key);
            queue.extend(library.dependencies(options.kinds).cloned());
            resolved.push(library);
        }

        debug!(
            "Resolved {} libraries from {} roots",
            resolved.len(),
            roots.len()
        );
        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve) but only the identities
    pub async fn resolve_identities(
        &self,
        roots: &[LibraryIdentity],
        options: &ResolveOptions,
    ) -> Result<Vec<LibraryIdentity>> {
        Ok(self
            .resolve(roots, options)
            .await?
            .into_iter()
            .map(|library| library.identity)
            .collect())
    }

    /// Declared dependencies of `library` that are neither installed nor in
    /// `provided`, in declaration order without repeats
    pub async fn missing_dependencies(
        &self,
        library: &InstalledLibrary,
        kinds: DependencyKinds,
        provided: &[LibraryIdentity],
    ) -> Result<Vec<LibraryIdentity>> {
        let mut missing: Vec<LibraryIdentity> = Vec::new();

        for dep in library.dependencies(kinds) {
            if provided.contains(dep) || missing.contains(dep) {
                continue;
            }
            if !self.repository.exists(dep).await? {
                missing.push(dep.clone());
            }
        }
        Ok(missing)
    }
}

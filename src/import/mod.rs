// src/import/mod.rs

//! Importing the libraries of an extracted package
//!
//! Discovers library directories, validates all of them (reporting every
//! problem at once), checks that each declared dependency is either already
//! installed or shipped alongside, then installs dependencies before their
//! dependents.

use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::install::{InstallCoordinator, InstallReport, StagedLibrary, discover};
use crate::library::{DependencyKinds, LibraryIdentity};
use crate::resolver::DependencyResolver;
use crate::validation::rules::{ValidationContext, library_pipeline};
use crate::validation::{PipelineOutcome, ValidationError, ValidationPipeline};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of importing one package
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Install attempts in the order they ran
    pub installed: Vec<InstallReport>,
    /// Libraries already present at an equal or newer patch
    pub up_to_date: Vec<LibraryIdentity>,
}

pub struct PackageImporter {
    coordinator: InstallCoordinator,
    resolver: DependencyResolver,
    pipeline: ValidationPipeline<StagedLibrary, ValidationContext>,
    context: ValidationContext,
}

impl PackageImporter {
    pub fn new(coordinator: InstallCoordinator, config: &RepositoryConfig) -> Self {
        let repository = coordinator.repository().clone();
        Self {
            resolver: DependencyResolver::new(repository.clone()),
            pipeline: library_pipeline(Some(repository)),
            context: ValidationContext::from(config),
            coordinator,
        }
    }

    /// Validate and install every library under `package_root`
    ///
    /// Nothing is installed unless every library loads, validates and has
    /// its dependencies available; otherwise all problems come back in one
    /// [`Error::Validation`].
    pub async fn import(&self, package_root: &Path) -> Result<ImportReport> {
        let mut errors = ValidationError::new();
        let mut staged = Vec::new();
        for dir in discover(package_root).await? {
            let directory = dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string());

            match StagedLibrary::load(dir).await {
                Ok(library) => staged.push(library),
                Err(Error::MissingRequiredFile { .. }) => {
                    errors.add_error("missing-manifest", [("library", directory)]);
                }
                Err(Error::Json(e)) => {
                    warn!("Unreadable manifest in {}: {}", directory, e);
                    errors.add_error(
                        "invalid-manifest",
                        [("directory", directory), ("message", e.to_string())],
                    );
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Found {} libraries in {}",
            staged.len(),
            package_root.display()
        );

        let provided: Vec<LibraryIdentity> = staged
            .iter()
            .map(|library| library.metadata.identity.clone())
            .collect();

        let mut pending = Vec::new();
        let mut report = ImportReport::default();

        for library in staged {
            let identity = library.metadata.identity.clone();
            match self.pipeline.run(library, &self.context).await {
                Ok(PipelineOutcome::Completed(library)) => pending.push(library),
                Ok(PipelineOutcome::Satisfied) => report.up_to_date.push(identity),
                Err(Error::Validation(failed)) => errors.entries.extend(failed.entries),
                Err(e) => return Err(e),
            }
        }

        for library in &pending {
            for dep in self
                .resolver
                .missing_dependencies(&library.metadata, DependencyKinds::ALL, &provided)
                .await?
            {
                errors.add_error(
                    "missing-dependency",
                    [
                        ("library", library.metadata.identity.to_string()),
                        ("dependency", dep.to_string()),
                    ],
                );
            }
        }

        if !errors.is_empty() {
            return Err(errors.abort());
        }

        for library in install_order(pending) {
            report.installed.push(self.coordinator.install(&library).await?);
        }
        Ok(report)
    }
}

/// Dependencies first, otherwise in discovery order; cycles are broken at
/// the first library revisited
fn install_order(libraries: Vec<StagedLibrary>) -> Vec<StagedLibrary> {
    let position: HashMap<LibraryIdentity, usize> = libraries
        .iter()
        .enumerate()
        .map(|(i, library)| (library.metadata.identity.clone(), i))
        .collect();

    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(libraries.len());
    for i in 0..libraries.len() {
        visit(i, &libraries, &position, &mut visited, &mut order);
    }

    let mut slots: Vec<Option<StagedLibrary>> = libraries.into_iter().map(Some).collect();
    let ordered: Vec<StagedLibrary> = order.into_iter().filter_map(|i| slots[i].take()).collect();
    debug!(
        "Install order: {:?}",
        ordered
            .iter()
            .map(|library| library.metadata.identity.to_string())
            .collect::<Vec<_>>()
    );
    ordered
}

fn visit(
    index: usize,
    libraries: &[StagedLibrary],
    position: &HashMap<LibraryIdentity, usize>,
    visited: &mut HashSet<usize>,
    order: &mut Vec<usize>,
) {
    if !visited.insert(index) {
        return;
    }
    for dep in libraries[index].metadata.dependencies(DependencyKinds::ALL) {
        if let Some(&dep_index) = position.get(dep) {
            visit(dep_index, libraries, position, visited, order);
        }
    }
    order.push(index);
}

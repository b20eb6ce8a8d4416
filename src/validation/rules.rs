// src/validation/rules.rs

//! Checks applied to a staged library before it may be installed

use super::{Rule, RuleOutcome, ValidationError, ValidationPipeline};
use crate::config::RepositoryConfig;
use crate::error::Result;
use crate::install::StagedLibrary;
use crate::library::{CoreApi, DependencyKinds, LibraryIdentity, MANIFEST_FILE, is_valid_machine_name};
use crate::repository::LibraryRepository;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Settings the library rules read
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    pub core_api: CoreApi,
    pub allowed_extensions: BTreeSet<String>,
    pub check_directory_names: bool,
}

impl From<&RepositoryConfig> for ValidationContext {
    fn from(config: &RepositoryConfig) -> Self {
        Self {
            core_api: config.core_api,
            allowed_extensions: config.allowed_extensions.clone(),
            check_directory_names: config.check_directory_names,
        }
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::from(&RepositoryConfig::default())
    }
}

fn library_param(library: &StagedLibrary) -> (&'static str, String) {
    ("library", library.metadata.identity.to_string())
}

/// Machine name syntax and, optionally, the directory name
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckIdentity;

#[async_trait]
impl Rule<StagedLibrary, ValidationContext> for CheckIdentity {
    fn name(&self) -> &str {
        "check-identity"
    }

    async fn apply(
        &self,
        library: StagedLibrary,
        context: &ValidationContext,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<StagedLibrary>> {
        let identity = &library.metadata.identity;

        if !is_valid_machine_name(&identity.machine_name) {
            errors.add_error(
                "invalid-machine-name",
                [("machineName", identity.machine_name.clone())],
            );
        }

        if context.check_directory_names {
            let expected = identity.library_key();
            if let Some(dir) = library.directory_name()
                && dir != expected
            {
                errors.add_error(
                    "library-directory-name-mismatch",
                    [("directory", dir.to_string()), ("expected", expected)],
                );
            }
        }

        Ok(RuleOutcome::Continue(library))
    }
}

/// Dependency entries must be well formed, unique and not self-referencing
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckDependencyDeclarations;

#[async_trait]
impl Rule<StagedLibrary, ValidationContext> for CheckDependencyDeclarations {
    fn name(&self) -> &str {
        "check-dependency-declarations"
    }

    async fn apply(
        &self,
        library: StagedLibrary,
        _context: &ValidationContext,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<StagedLibrary>> {
        let metadata = &library.metadata;
        let mut seen: HashSet<&LibraryIdentity> = HashSet::new();

        for dep in metadata.dependencies(DependencyKinds::ALL) {
            if !is_valid_machine_name(&dep.machine_name) {
                errors.add_error(
                    "invalid-dependency",
                    [library_param(&library), ("dependency", dep.machine_name.clone())],
                );
            } else if dep.machine_name == metadata.identity.machine_name {
                errors.add_error(
                    "self-dependency",
                    [library_param(&library), ("dependency", dep.to_string())],
                );
            } else if !seen.insert(dep) {
                debug!("{} declares {} more than once", metadata.identity, dep);
            }
        }

        Ok(RuleOutcome::Continue(library))
    }
}

/// The library must not need a newer core API than this build provides
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckCoreApi;

#[async_trait]
impl Rule<StagedLibrary, ValidationContext> for CheckCoreApi {
    fn name(&self) -> &str {
        "check-core-api"
    }

    async fn apply(
        &self,
        library: StagedLibrary,
        context: &ValidationContext,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<StagedLibrary>> {
        if let Some(required) = library.metadata.core_api
            && required > context.core_api
        {
            errors.add_error(
                "unsupported-core-api",
                [
                    library_param(&library),
                    (
                        "required",
                        format!("{}.{}", required.major_version, required.minor_version),
                    ),
                    (
                        "supported",
                        format!(
                            "{}.{}",
                            context.core_api.major_version, context.core_api.minor_version
                        ),
                    ),
                ],
            );
        }
        Ok(RuleOutcome::Continue(library))
    }
}

/// Every payload file must carry a whitelisted extension
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckFileExtensions;

#[async_trait]
impl Rule<StagedLibrary, ValidationContext> for CheckFileExtensions {
    fn name(&self) -> &str {
        "check-file-extensions"
    }

    async fn apply(
        &self,
        library: StagedLibrary,
        context: &ValidationContext,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<StagedLibrary>> {
        for path in library.payload_files() {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            let allowed = file_name
                .rsplit_once('.')
                .map(|(_, ext)| context.allowed_extensions.contains(&ext.to_ascii_lowercase()))
                .unwrap_or(false);

            if !allowed {
                errors.add_error(
                    "forbidden-file-extension",
                    [library_param(&library), ("path", path.to_string())],
                );
            }
        }
        Ok(RuleOutcome::Continue(library))
    }
}

/// Files referenced by the manifest must be present in staging
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckRequiredFiles;

#[async_trait]
impl Rule<StagedLibrary, ValidationContext> for CheckRequiredFiles {
    fn name(&self) -> &str {
        "check-required-files"
    }

    async fn apply(
        &self,
        library: StagedLibrary,
        _context: &ValidationContext,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<StagedLibrary>> {
        for path in library.missing_files() {
            if path == MANIFEST_FILE {
                return Err(errors.abort_with("missing-manifest", [library_param(&library)]));
            }
            errors.add_error("missing-required-file", [library_param(&library), ("path", path)]);
        }
        Ok(RuleOutcome::Continue(library))
    }
}

/// Stops the pipeline when an equal or newer patch is already installed
#[derive(Debug, Clone)]
pub struct SkipIfInstalled {
    repository: LibraryRepository,
}

impl SkipIfInstalled {
    pub fn new(repository: LibraryRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Rule<StagedLibrary, ValidationContext> for SkipIfInstalled {
    fn name(&self) -> &str {
        "skip-if-installed"
    }

    async fn apply(
        &self,
        library: StagedLibrary,
        _context: &ValidationContext,
        _errors: &mut ValidationError,
    ) -> Result<RuleOutcome<StagedLibrary>> {
        match self.repository.get(&library.metadata.identity).await? {
            Some(installed) if installed.patch_version >= library.metadata.patch_version => {
                debug!(
                    "{} already installed at patch {}",
                    installed.identity, installed.patch_version
                );
                Ok(RuleOutcome::Satisfied)
            }
            _ => Ok(RuleOutcome::Continue(library)),
        }
    }
}

/// The standard chain for staged libraries
///
/// With a repository, libraries already installed at an equal or newer patch
/// come back as [`super::PipelineOutcome::Satisfied`] before any file is
/// scanned.
pub fn library_pipeline(
    repository: Option<LibraryRepository>,
) -> ValidationPipeline<StagedLibrary, ValidationContext> {
    let pipeline = match repository {
        Some(repository) => ValidationPipeline::new().add_rule(SkipIfInstalled::new(repository)),
        None => ValidationPipeline::new(),
    };

    pipeline
        .add_rule(CheckIdentity)
        .add_rule(CheckDependencyDeclarations)
        .add_rule(CheckCoreApi)
        .add_rule(CheckFileExtensions)
        .add_rule(CheckRequiredFiles)
        .throw_if_errors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::library::InstalledLibrary;
    use crate::storage::{LibraryStorage, MemoryStorage};
    use crate::validation::PipelineOutcome;
    use std::sync::Arc;

    fn id(name: &str, major: u32, minor: u32) -> LibraryIdentity {
        LibraryIdentity::new(name, major, minor).unwrap()
    }

    fn staged(metadata: InstalledLibrary, files: &[&str]) -> StagedLibrary {
        let dir = format!("/tmp/staging/{}", metadata.library_key());
        StagedLibrary::new(dir, metadata, files.iter().map(|f| f.to_string()).collect())
    }

    fn foo_bar(patch: u32) -> InstalledLibrary {
        let mut lib = InstalledLibrary::new(id("Foo.Bar", 1, 0), patch, "Foo");
        lib.preloaded_js = vec!["js/foo.js".to_string()];
        lib
    }

    fn validation_codes(err: Error) -> Vec<String> {
        match err {
            Error::Validation(err) => err.codes().map(str::to_string).collect(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_valid_library_passes() {
        let library = staged(foo_bar(2), &["library.json", "js/foo.js"]);
        let outcome = library_pipeline(None)
            .run(library.clone(), &ValidationContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed(library));
    }

    #[tokio::test]
    async fn test_problems_are_aggregated() {
        let mut metadata = foo_bar(2);
        metadata.preloaded_dependencies = vec![id("Foo.Bar", 1, 1)];
        metadata.core_api = Some(CoreApi::new(9, 0));
        let library = staged(metadata, &["library.json", "js/foo.js", "bin/evil.exe", "README"]);

        let err = library_pipeline(None)
            .run(library, &ValidationContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            validation_codes(err),
            vec![
                "self-dependency",
                "unsupported-core-api",
                "forbidden-file-extension",
                "forbidden-file-extension",
            ]
        );
    }

    #[tokio::test]
    async fn test_directory_name_mismatch() {
        let library = StagedLibrary::new(
            "/tmp/staging/foo",
            foo_bar(2),
            vec!["library.json".to_string(), "js/foo.js".to_string()],
        );
        let context = ValidationContext::default();
        let err = library_pipeline(None).run(library.clone(), &context).await.unwrap_err();
        assert_eq!(validation_codes(err), vec!["library-directory-name-mismatch"]);

        let lenient = ValidationContext {
            check_directory_names: false,
            ..context
        };
        assert!(library_pipeline(None).run(library, &lenient).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_manifest_aborts() {
        let library = staged(foo_bar(2), &["js/foo.js"]);
        let err = library_pipeline(None)
            .run(library, &ValidationContext::default())
            .await
            .unwrap_err();
        assert_eq!(validation_codes(err), vec!["missing-manifest"]);
    }

    #[tokio::test]
    async fn test_missing_required_file() {
        let library = staged(foo_bar(2), &["library.json"]);
        let err = library_pipeline(None)
            .run(library, &ValidationContext::default())
            .await
            .unwrap_err();
        assert_eq!(validation_codes(err), vec!["missing-required-file"]);
    }

    #[tokio::test]
    async fn test_skip_if_installed() {
        let storage = MemoryStorage::new();
        storage.write_metadata("Foo.Bar-1.0", &foo_bar(2)).await.unwrap();
        let repository = LibraryRepository::new(Arc::new(storage));
        let pipeline = library_pipeline(Some(repository));
        let context = ValidationContext::default();

        for patch in [1, 2] {
            let outcome = pipeline
                .run(staged(foo_bar(patch), &["library.json", "js/foo.js"]), &context)
                .await
                .unwrap();
            assert!(outcome.is_satisfied(), "patch {} should be skipped", patch);
        }

        let outcome = pipeline
            .run(staged(foo_bar(3), &["library.json", "js/foo.js"]), &context)
            .await
            .unwrap();
        assert!(!outcome.is_satisfied());
    }

    #[tokio::test]
    async fn test_installed_library_skips_file_checks() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write_metadata("Foo.Bar-1.0", &foo_bar(2)).await.unwrap();
        let pipeline = library_pipeline(Some(LibraryRepository::new(storage)));

        // Would fail the extension and required-file checks if they ran
        let outcome = pipeline
            .run(
                staged(foo_bar(2), &["library.json", "evil.exe"]),
                &ValidationContext::default(),
            )
            .await
            .unwrap();
        assert!(outcome.is_satisfied());
    }
}

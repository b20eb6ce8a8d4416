// src/lib.rs

//! Libvault Library Repository
//!
//! Stores versioned, interdependent content libraries and keeps the store
//! consistent while they are installed, upgraded and removed.
//!
//! # Architecture
//!
//! - Identities: `Foo.Bar-1.0` names one major.minor line of a library
//! - Validation: ordered rule pipelines that report every problem at once
//! - Resolution: breadth-first, cycle-safe dependency expansion
//! - Installation: per-library locks, metadata written last, delete on failure
//! - Storage: pluggable backends (filesystem directory or SQLite database)

pub mod config;
pub mod db;
mod error;
pub mod import;
pub mod install;
pub mod library;
pub mod lock;
pub mod repository;
pub mod resolver;
pub mod storage;
pub mod validation;

pub use config::RepositoryConfig;
pub use error::{Error, Result};
pub use install::{InstallAction, InstallCoordinator, InstallReport, StagedLibrary};
pub use library::{InstalledLibrary, LibraryIdentity, SeparatorPolicy};
pub use repository::LibraryRepository;
pub use resolver::{DependencyResolver, ResolveOptions};
pub use validation::{PipelineOutcome, ValidationError, ValidationPipeline};

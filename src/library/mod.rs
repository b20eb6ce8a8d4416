// src/library/mod.rs

//! Library identities and manifests
//!
//! Pure data: nothing in this module touches storage.

pub mod identity;
pub mod metadata;

pub use identity::{
    LibraryIdentity, SeparatorPolicy, is_valid_machine_name, parse_version_component,
    validate_machine_name,
};
pub use metadata::{
    CoreApi, DependencyKinds, InstalledLibrary, LANGUAGE_DIR, MANIFEST_FILE, SEMANTICS_FILE,
    language_file,
};

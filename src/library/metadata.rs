// src/library/metadata.rs

//! The `library.json` manifest and the installed-library record
//!
//! The same structure is used for a staged candidate (read from the
//! manifest shipped in a package) and for the record the repository keeps
//! once a library is installed. Upgrades replace it wholesale.

use crate::error::Result;
use crate::library::identity::{LibraryIdentity, version_number};
use serde::{Deserialize, Deserializer, Serialize};

/// Manifest file name inside every library directory
pub const MANIFEST_FILE: &str = "library.json";

/// Optional editor semantics definition
pub const SEMANTICS_FILE: &str = "semantics.json";

/// Directory holding `<code>.json` translation files
pub const LANGUAGE_DIR: &str = "language";

/// Core API version a library was written against
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreApi {
    #[serde(deserialize_with = "version_number")]
    pub major_version: u32,
    #[serde(deserialize_with = "version_number")]
    pub minor_version: u32,
}

impl CoreApi {
    pub const fn new(major_version: u32, minor_version: u32) -> Self {
        Self {
            major_version,
            minor_version,
        }
    }
}

/// Which dependency declarations to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyKinds {
    pub preloaded: bool,
    pub editor: bool,
    pub dynamic: bool,
}

impl DependencyKinds {
    pub const PRELOADED: Self = Self {
        preloaded: true,
        editor: false,
        dynamic: false,
    };
    pub const ALL: Self = Self {
        preloaded: true,
        editor: true,
        dynamic: true,
    };
}

impl Default for DependencyKinds {
    fn default() -> Self {
        Self::PRELOADED
    }
}

/// A library as described by its manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledLibrary {
    #[serde(flatten)]
    pub identity: LibraryIdentity,

    #[serde(deserialize_with = "version_number")]
    pub patch_version: u32,

    pub title: String,

    #[serde(default, deserialize_with = "flag")]
    pub runnable: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preloaded_dependencies: Vec<LibraryIdentity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editor_dependencies: Vec<LibraryIdentity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_dependencies: Vec<LibraryIdentity>,

    #[serde(default, with = "path_list", skip_serializing_if = "Vec::is_empty")]
    pub preloaded_css: Vec<String>,

    #[serde(default, with = "path_list", skip_serializing_if = "Vec::is_empty")]
    pub preloaded_js: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_settings: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_api: Option<CoreApi>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embed_types: Vec<String>,

    #[serde(default, deserialize_with = "flag")]
    pub fullscreen: bool,

    /// Translation codes shipped as `language/<code>.json`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
}

impl InstalledLibrary {
    /// Create a minimal library record
    pub fn new(identity: LibraryIdentity, patch_version: u32, title: impl Into<String>) -> Self {
        Self {
            identity,
            patch_version,
            title: title.into(),
            runnable: false,
            preloaded_dependencies: Vec::new(),
            editor_dependencies: Vec::new(),
            dynamic_dependencies: Vec::new(),
            preloaded_css: Vec::new(),
            preloaded_js: Vec::new(),
            metadata_settings: None,
            description: None,
            author: None,
            license: None,
            core_api: None,
            embed_types: Vec::new(),
            fullscreen: false,
            languages: Vec::new(),
        }
    }

    /// Parse a `library.json` manifest
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to the manifest format
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn identity(&self) -> &LibraryIdentity {
        &self.identity
    }

    pub fn machine_name(&self) -> &str {
        &self.identity.machine_name
    }

    pub fn library_key(&self) -> String {
        self.identity.library_key()
    }

    /// Full major.minor.patch version
    pub fn version(&self) -> semver::Version {
        self.identity.version_with_patch(self.patch_version)
    }

    /// Declared dependencies of the requested kinds, in declaration order
    /// (preloaded first, then editor, then dynamic)
    pub fn dependencies(&self, kinds: DependencyKinds) -> impl Iterator<Item = &LibraryIdentity> {
        fn pick(enabled: bool, deps: &[LibraryIdentity]) -> &[LibraryIdentity] {
            if enabled { deps } else { &[] }
        }

        pick(kinds.preloaded, &self.preloaded_dependencies)
            .iter()
            .chain(pick(kinds.editor, &self.editor_dependencies))
            .chain(pick(kinds.dynamic, &self.dynamic_dependencies))
    }

    /// Files that must be present for the library to be usable
    pub fn required_files(&self) -> Vec<String> {
        let mut files = vec![MANIFEST_FILE.to_string()];
        files.extend(self.preloaded_js.iter().cloned());
        files.extend(self.preloaded_css.iter().cloned());
        files.extend(self.languages.iter().map(|code| language_file(code)));
        files
    }
}

/// Relative path of a translation file
pub fn language_file(code: &str) -> String {
    format!("{}/{}.json", LANGUAGE_DIR, code)
}

/// Accept `true`/`false` as well as the legacy `1`/`0`
fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => b,
        Raw::Number(n) => n != 0,
    })
}

/// Manifests list files as `[{"path": "x.js"}]`; plain strings are accepted too
mod path_list {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    struct EntryRef<'a> {
        path: &'a str,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Object { path: String },
        Plain(String),
    }

    pub fn serialize<S>(paths: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(paths.iter().map(|p| EntryRef { path: p }))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                Entry::Object { path } | Entry::Plain(path) => path,
            })
            .collect())
    }
}

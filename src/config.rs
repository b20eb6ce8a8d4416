// src/config.rs

//! Runtime settings for a library repository
//!
//! There is no configuration file. Defaults live here and the command line
//! overrides individual fields.

use crate::library::{CoreApi, SeparatorPolicy};
use std::collections::BTreeSet;
use std::time::Duration;

/// Core API version this build can run
pub const SUPPORTED_CORE_API: CoreApi = CoreApi::new(1, 26);

/// File extensions a library may ship besides `library.json`
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "js", "css", "json", "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "svg", "eot", "ttf",
    "woff", "woff2", "otf", "webm", "mp4", "ogg", "mp3", "m4a", "wav", "txt", "pdf", "rtf", "doc",
    "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "xml", "csv", "diff", "patch",
    "md", "textile", "vtt", "webvtt", "gltf", "glb",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
    /// How long a crashed lock holder may keep a library locked
    pub lock_max_occupation: Duration,
    /// How long an install waits for the lock before giving up
    pub lock_acquisition_timeout: Duration,
    /// Poll interval of the file lock provider
    pub lock_poll_interval: Duration,
    /// Separators accepted when parsing ubernames from user input
    pub separator_policy: SeparatorPolicy,
    pub core_api: CoreApi,
    /// Lowercase, without the leading dot
    pub allowed_extensions: BTreeSet<String>,
    /// Require library directories to be named after their ubername
    pub check_directory_names: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            lock_max_occupation: Duration::from_secs(60),
            lock_acquisition_timeout: Duration::from_secs(30),
            lock_poll_interval: Duration::from_millis(50),
            separator_policy: SeparatorPolicy::ANY,
            core_api: SUPPORTED_CORE_API,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            check_directory_names: true,
        }
    }
}

impl RepositoryConfig {
    /// Add extensions to the whitelist, normalizing case and leading dots
    pub fn allow_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions.extend(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty()),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::default();
        assert!(config.allowed_extensions.contains("js"));
        assert!(!config.allowed_extensions.contains("exe"));
        assert!(config.lock_acquisition_timeout < config.lock_max_occupation);
    }

    #[test]
    fn test_allow_extensions_normalizes() {
        let config = RepositoryConfig::default().allow_extensions([".WASM", "", "Map"]);
        assert!(config.allowed_extensions.contains("wasm"));
        assert!(config.allowed_extensions.contains("map"));
        assert!(!config.allowed_extensions.contains(""));
    }
}

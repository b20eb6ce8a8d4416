// src/library/identity.rs

//! Library identity: the (machine name, major, minor) triple
//!
//! The canonical string form is the "ubername", `Foo.Bar-1.0`. The separator
//! between machine name and version is governed by a [`SeparatorPolicy`] so
//! that legacy `Foo.Bar 1.0` strings can be read as well.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which separators are accepted between machine name and version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparatorPolicy {
    pub allow_hyphen: bool,
    pub allow_space: bool,
}

impl SeparatorPolicy {
    pub const HYPHEN: Self = Self {
        allow_hyphen: true,
        allow_space: false,
    };
    pub const SPACE: Self = Self {
        allow_hyphen: false,
        allow_space: true,
    };
    pub const ANY: Self = Self {
        allow_hyphen: true,
        allow_space: true,
    };

    fn assert_usable(&self) {
        assert!(
            self.allow_hyphen || self.allow_space,
            "separator policy must allow at least one of hyphen or space"
        );
    }

    fn accepts(&self, c: char) -> bool {
        (self.allow_hyphen && c == '-') || (self.allow_space && c == ' ')
    }

    /// Separator used when rendering; hyphen wins when both are allowed
    fn render_separator(&self) -> char {
        if self.allow_hyphen { '-' } else { ' ' }
    }

    fn example(&self) -> String {
        format!("Foo.Bar{}1.0", self.render_separator())
    }
}

impl Default for SeparatorPolicy {
    fn default() -> Self {
        Self::ANY
    }
}

/// Identity of a library version, pinned to major.minor
///
/// Deserialization goes through [`LibraryIdentity::new`], so a manifest or
/// dependency entry with a malformed machine name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawIdentity")]
pub struct LibraryIdentity {
    pub machine_name: String,
    pub major_version: u32,
    pub minor_version: u32,
}

/// Unchecked wire form of [`LibraryIdentity`]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIdentity {
    machine_name: String,
    #[serde(deserialize_with = "version_number")]
    major_version: u32,
    #[serde(deserialize_with = "version_number")]
    minor_version: u32,
}

impl TryFrom<RawIdentity> for LibraryIdentity {
    type Error = Error;

    fn try_from(raw: RawIdentity) -> Result<Self> {
        Self::new(raw.machine_name, raw.major_version, raw.minor_version)
    }
}

impl LibraryIdentity {
    /// Create a new identity, validating the machine name
    pub fn new(machine_name: impl Into<String>, major_version: u32, minor_version: u32) -> Result<Self> {
        let machine_name = machine_name.into();
        validate_machine_name(&machine_name)?;
        Ok(Self {
            machine_name,
            major_version,
            minor_version,
        })
    }

    /// Parse an ubername under the given separator policy
    ///
    /// # Panics
    ///
    /// Panics if `policy` allows neither separator.
    pub fn parse(text: &str, policy: SeparatorPolicy) -> Result<Self> {
        policy.assert_usable();

        let format_error = || Error::InvalidIdentityFormat {
            text: text.to_string(),
            example: policy.example(),
        };

        let sep = text.rfind(|c| policy.accepts(c)).ok_or_else(format_error)?;
        let (name, version) = (&text[..sep], &text[sep + 1..]);

        if name.is_empty() || !is_valid_machine_name(name) {
            return Err(format_error());
        }

        let (major, minor) = version.split_once('.').ok_or_else(format_error)?;
        if !is_numeric(major) || !is_numeric(minor) {
            return Err(format_error());
        }

        Ok(Self {
            machine_name: name.to_string(),
            major_version: major.parse().map_err(|_| format_error())?,
            minor_version: minor.parse().map_err(|_| format_error())?,
        })
    }

    /// Render the ubername under the given separator policy
    ///
    /// # Panics
    ///
    /// Panics if `policy` allows neither separator, or if the rendered string
    /// does not parse back to this identity (a machine name that was never
    /// validated and contains a separator).
    pub fn render(&self, policy: SeparatorPolicy) -> String {
        policy.assert_usable();

        let rendered = format!(
            "{}{}{}.{}",
            self.machine_name,
            policy.render_separator(),
            self.major_version,
            self.minor_version
        );

        match Self::parse(&rendered, policy) {
            Ok(parsed) if parsed == *self => rendered,
            _ => panic!("library identity {:?} does not survive rendering as '{}'", self, rendered),
        }
    }

    /// Storage key for this library, always the hyphen ubername
    pub fn library_key(&self) -> String {
        self.to_string()
    }

    /// Full semantic version for a given patch level
    pub fn version_with_patch(&self, patch: u32) -> semver::Version {
        semver::Version::new(
            u64::from(self.major_version),
            u64::from(self.minor_version),
            u64::from(patch),
        )
    }
}

impl fmt::Display for LibraryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.machine_name, self.major_version, self.minor_version)
    }
}

impl FromStr for LibraryIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, SeparatorPolicy::default())
    }
}

/// Check a machine name against `^[A-Za-z0-9_.]+$`
pub fn is_valid_machine_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Validate a machine name, returning a typed error when it is malformed
pub fn validate_machine_name(name: &str) -> Result<()> {
    if is_valid_machine_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidMachineName(name.to_string()))
    }
}

/// Parse a version component, rejecting anything but plain digits
pub fn parse_version_component(field: &'static str, value: &str) -> Result<u32> {
    let invalid = || Error::InvalidVersion {
        field,
        value: value.to_string(),
    };

    if !is_numeric(value) {
        return Err(invalid());
    }
    value.parse().map_err(|_| invalid())
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Accept a version number either as a JSON integer or a numeric string
pub(crate) fn version_number<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => {
            parse_version_component("version", &s).map_err(serde::de::Error::custom)
        }
    }
}

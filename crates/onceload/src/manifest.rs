// SPDX-License-Identifier: Apache-2.0
//! JSON manifest input from the packaging layer.
//!
//! The surrounding packaging tooling knows, per platform, where inside the
//! wheel each library lives. It hands that knowledge over as a small JSON
//! document (generated into the wheel next to the libraries):
//!
//! ```json
//! {
//!   "policy": "prefer-wheel",
//!   "libraries": {
//!     "foo": {
//!       "linux":   { "path": "lib/libfoo.so", "key": "libfoo.so.2" },
//!       "macos":   "lib/libfoo.dylib",
//!       "windows": "unsupported"
//!     }
//!   }
//! }
//! ```
//!
//! A platform maps to a bare path string, to an object carrying the path
//! plus a declared registry key, or to the literal string `"unsupported"`.
//! Relative paths are resolved against the manifest file's directory.
//! In-process construction through [`LibraryDescriptor`]'s builders remains
//! first-class; the manifest is just the serialized form of the same data.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::descriptor::LibraryDescriptor;
use crate::error::{LoadError, Result};
use crate::loader::LibraryLoader;
use crate::platform::Platform;
use crate::policy::LoadPolicy;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    policy: Option<LoadPolicy>,
    libraries: BTreeMap<String, BTreeMap<Platform, RawEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Plain(String),
    Detailed {
        path: String,
        #[serde(default)]
        key: Option<String>,
    },
}

/// A parsed library manifest: a load policy plus descriptors, ready to
/// seed a [`LibraryLoader`].
#[derive(Debug)]
pub struct LibraryManifest {
    policy: LoadPolicy,
    descriptors: Vec<LibraryDescriptor>,
}

impl LibraryManifest {
    /// Parse a manifest from JSON text, resolving relative paths against
    /// `root`.
    pub fn from_json_str(json: &str, root: &Path) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(json).map_err(|e| LoadError::Manifest {
            cause: e.to_string(),
        })?;

        let mut descriptors = Vec::with_capacity(raw.libraries.len());
        for (name, platforms) in raw.libraries {
            if platforms.is_empty() {
                return Err(LoadError::Manifest {
                    cause: format!("library '{name}' declares no platforms"),
                });
            }
            let mut descriptor = LibraryDescriptor::new(&name);
            for (platform, entry) in platforms {
                descriptor = match entry {
                    RawEntry::Plain(s) if s == "unsupported" => {
                        descriptor.unsupported_on(platform)
                    }
                    RawEntry::Plain(path) => descriptor.with_path(platform, path),
                    RawEntry::Detailed { path, key: None } => {
                        descriptor.with_path(platform, path)
                    }
                    RawEntry::Detailed {
                        path,
                        key: Some(key),
                    } => descriptor.with_keyed_path(platform, path, key),
                };
            }
            descriptor.resolve_relative_to(root);
            descriptors.push(descriptor);
        }

        Ok(Self {
            policy: raw.policy.unwrap_or_default(),
            descriptors,
        })
    }

    /// Read and parse a manifest file; relative paths resolve against the
    /// file's directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| LoadError::Manifest {
            cause: format!("cannot read '{}': {e}", path.display()),
        })?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json_str(&json, root)
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub fn descriptors(&self) -> &[LibraryDescriptor] {
        &self.descriptors
    }

    /// Build a loader seeded with every descriptor in the manifest.
    pub fn into_loader(self) -> Result<LibraryLoader> {
        let loader = LibraryLoader::new(self.policy);
        loader.register_all(self.descriptors)?;
        Ok(loader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "policy": "prefer-wheel",
        "libraries": {
            "foo": {
                "linux":   { "path": "lib/libfoo.so", "key": "libfoo.so.2" },
                "macos":   "lib/libfoo.dylib",
                "windows": "unsupported"
            },
            "bar": {
                "linux": "lib/libbar.so"
            }
        }
    }"#;

    #[test]
    fn parses_all_entry_forms() {
        let m = LibraryManifest::from_json_str(MANIFEST, Path::new("/wheel")).unwrap();
        assert_eq!(m.policy(), LoadPolicy::PreferWheel);
        assert_eq!(m.descriptors().len(), 2);

        let foo = m
            .descriptors()
            .iter()
            .find(|d| d.name() == "foo")
            .unwrap();
        let (path, key) = foo.bundled_entry(Platform::Linux).unwrap();
        assert_eq!(path, Path::new("/wheel/lib/libfoo.so"));
        assert_eq!(key, Some("libfoo.so.2"));
        assert!(foo.bundled_entry(Platform::Windows).is_err());
    }

    #[test]
    fn missing_policy_defaults_to_wheel_only() {
        let m = LibraryManifest::from_json_str(
            r#"{ "libraries": { "foo": { "linux": "libfoo.so" } } }"#,
            Path::new("/wheel"),
        )
        .unwrap();
        assert_eq!(m.policy(), LoadPolicy::WheelOnly);
    }

    #[test]
    fn invalid_policy_is_rejected_at_parse_time() {
        let err = LibraryManifest::from_json_str(
            r#"{ "policy": "yolo", "libraries": { "foo": { "linux": "libfoo.so" } } }"#,
            Path::new("/wheel"),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Manifest { .. }));
    }

    #[test]
    fn empty_platform_set_is_rejected() {
        let err = LibraryManifest::from_json_str(
            r#"{ "libraries": { "foo": {} } }"#,
            Path::new("/wheel"),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Manifest { .. }));
    }

    #[test]
    fn manifest_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onceload.json");
        std::fs::write(&path, MANIFEST).unwrap();

        let m = LibraryManifest::from_path(&path).unwrap();
        let bar = m.descriptors().iter().find(|d| d.name() == "bar").unwrap();
        let (p, _) = bar.bundled_entry(Platform::Linux).unwrap();
        assert_eq!(p, dir.path().join("lib/libbar.so"));
    }
}

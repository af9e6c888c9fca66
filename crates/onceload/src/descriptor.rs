// SPDX-License-Identifier: Apache-2.0
//! Static per-library configuration.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};
use crate::platform::Platform;

/// What a descriptor says about one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformEntry {
    /// The wheel bundles the library at this path.
    Bundled {
        path: PathBuf,
        /// Registry key the packaging layer already knows (SONAME / install
        /// name), overriding what would be read from the file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        declared_key: Option<String>,
    },
    /// The library is deliberately not shipped on this platform. Distinct
    /// from an absent entry, which is a packaging bug and fails fast.
    Unsupported,
}

/// Logical name plus the per-platform locations of one native library.
///
/// Built either in-process with the builder methods or from a
/// [`crate::manifest::LibraryManifest`]. The invariant callers rely on:
/// every platform the wheel may run on has an entry, and a missing entry
/// surfaces as [`LoadError::NotFoundOnPlatform`] at load time, never as a
/// silent skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDescriptor {
    name: String,
    entries: FxHashMap<Platform, PlatformEntry>,
}

impl LibraryDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: FxHashMap::default(),
        }
    }

    /// Declare the bundled path for `platform`.
    #[must_use]
    pub fn with_path(mut self, platform: Platform, path: impl Into<PathBuf>) -> Self {
        self.entries.insert(
            platform,
            PlatformEntry::Bundled {
                path: path.into(),
                declared_key: None,
            },
        );
        self
    }

    /// Declare the bundled path together with its known registry key.
    #[must_use]
    pub fn with_keyed_path(
        mut self,
        platform: Platform,
        path: impl Into<PathBuf>,
        key: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            platform,
            PlatformEntry::Bundled {
                path: path.into(),
                declared_key: Some(key.into()),
            },
        );
        self
    }

    /// Mark the library as intentionally absent on `platform`.
    #[must_use]
    pub fn unsupported_on(mut self, platform: Platform) -> Self {
        self.entries.insert(platform, PlatformEntry::Unsupported);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry for `platform`; absent entries and explicit `Unsupported`
    /// markers both fail fast with [`LoadError::NotFoundOnPlatform`].
    pub fn bundled_entry(&self, platform: Platform) -> Result<(&Path, Option<&str>)> {
        match self.entries.get(&platform) {
            Some(PlatformEntry::Bundled { path, declared_key }) => {
                Ok((path.as_path(), declared_key.as_deref()))
            }
            Some(PlatformEntry::Unsupported) | None => Err(LoadError::NotFoundOnPlatform {
                name: self.name.clone(),
                platform,
            }),
        }
    }

    /// The bare filename the OS search rules are asked for on a system
    /// load attempt: the declared key if one exists, else the bundled
    /// path's filename.
    pub fn system_name(&self, platform: Platform) -> Result<String> {
        let (path, declared) = self.bundled_entry(platform)?;
        if let Some(key) = declared {
            return Ok(key.to_string());
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| LoadError::NotFoundOnPlatform {
                name: self.name.clone(),
                platform,
            })
    }

    /// Resolve any relative bundled paths against `root` (used by the
    /// manifest layer, where paths are wheel-root-relative).
    pub(crate) fn resolve_relative_to(&mut self, root: &Path) {
        for entry in self.entries.values_mut() {
            if let PlatformEntry::Bundled { path, .. } = entry {
                if path.is_relative() {
                    *path = root.join(&*path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_platform_fails_fast() {
        let d = LibraryDescriptor::new("foo").with_path(Platform::Linux, "/wheel/libfoo.so");
        let err = d.bundled_entry(Platform::Windows).unwrap_err();
        assert!(matches!(err, LoadError::NotFoundOnPlatform { .. }));
    }

    #[test]
    fn unsupported_marker_fails_fast_like_absent() {
        let d = LibraryDescriptor::new("foo")
            .with_path(Platform::Linux, "/wheel/libfoo.so")
            .unsupported_on(Platform::Windows);
        let err = d.bundled_entry(Platform::Windows).unwrap_err();
        assert!(matches!(
            err,
            LoadError::NotFoundOnPlatform {
                platform: Platform::Windows,
                ..
            }
        ));
    }

    #[test]
    fn system_name_prefers_declared_key() {
        let d = LibraryDescriptor::new("foo").with_keyed_path(
            Platform::Linux,
            "/wheel/libfoo.so",
            "libfoo.so.2",
        );
        assert_eq!(d.system_name(Platform::Linux).unwrap(), "libfoo.so.2");

        let d = LibraryDescriptor::new("foo").with_path(Platform::Linux, "/wheel/libfoo.so");
        assert_eq!(d.system_name(Platform::Linux).unwrap(), "libfoo.so");
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let mut d = LibraryDescriptor::new("foo").with_path(Platform::Linux, "lib/libfoo.so");
        d.resolve_relative_to(Path::new("/wheel"));
        let (path, _) = d.bundled_entry(Platform::Linux).unwrap();
        assert_eq!(path, Path::new("/wheel/lib/libfoo.so"));
    }
}

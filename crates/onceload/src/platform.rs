// SPDX-License-Identifier: Apache-2.0
//! Platform identification.
//!
//! The platform is determined once, at compile time, from the build target.
//! Every descriptor lookup and registry-key derivation is keyed on it.

use serde::{Deserialize, Serialize};

/// The operating systems whose dynamic loaders this crate understands.
///
/// The set is closed on purpose: each member implies a concrete loader
/// registry keying rule (see [`crate::key`]). Unix targets that are neither
/// Linux nor macOS are treated as Linux, since they share ELF semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// ELF loaders keyed by `DT_SONAME`.
    Linux,
    /// Mach-O loaders keyed by the embedded install name (`LC_ID_DYLIB`).
    #[serde(rename = "macos")]
    MacOs,
    /// PE loaders keyed by the case-insensitive base filename.
    Windows,
}

impl Platform {
    /// The platform of the running process.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Conventional shared-library filename extension.
    pub fn shared_lib_extension(&self) -> &'static str {
        match self {
            Platform::Linux => "so",
            Platform::MacOs => "dylib",
            Platform::Windows => "dll",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Windows => "windows",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_matches_target() {
        let p = Platform::current();
        #[cfg(target_os = "linux")]
        assert_eq!(p, Platform::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(p, Platform::MacOs);
        #[cfg(target_os = "windows")]
        assert_eq!(p, Platform::Windows);
    }

    #[test]
    fn serde_round_trip_uses_lowercase_names() {
        let json = serde_json::to_string(&Platform::MacOs).unwrap();
        assert_eq!(json, "\"macos\"");
        let back: Platform = serde_json::from_str("\"windows\"").unwrap();
        assert_eq!(back, Platform::Windows);
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Error types for the load-once protocol.

use std::path::PathBuf;

use crate::platform::Platform;

/// Errors arising from library registration and loading.
///
/// All variants are `Clone` because a terminal failure is memoized in the
/// loader's record table and re-propagated verbatim on every subsequent
/// `ensure_loaded` call for the same name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The name was never registered with this loader. A programming error
    /// on the exporter side, not a packaging problem.
    #[error("library '{name}' is not registered with this loader")]
    NotRegistered { name: String },

    /// The descriptor has no entry for the running platform, or marks it
    /// unsupported. Wheels must declare every platform they ship on.
    #[error("library '{name}' has no entry for platform '{platform}'; this is a packaging bug")]
    NotFoundOnPlatform { name: String, platform: Platform },

    /// The resolved path does not exist on disk. Filesystem state is assumed
    /// stable within a process lifetime, so this is never retried.
    #[error("library '{name}' not found at '{path}'")]
    FileMissing { name: String, path: PathBuf },

    /// The OS loader rejected the library. The OS diagnostic is preserved
    /// verbatim in `cause`.
    #[error("failed to load library '{name}' from '{target}': {cause}")]
    LoadFailed {
        name: String,
        target: String,
        cause: String,
    },

    /// The OS loader found the file but could not resolve a required symbol.
    /// Distinct from [`LoadFailed`](Self::LoadFailed): the remediation is
    /// packaging metadata (SONAME / install name / transitive deps), not a
    /// missing file.
    #[error("unresolved symbols while loading library '{name}' from '{target}': {cause}")]
    UnresolvedSymbols {
        name: String,
        target: String,
        cause: String,
    },

    /// `register` was called twice for the same name with a different path
    /// set. Re-registering identical data is a no-op, so this is always a
    /// programming error.
    #[error("library '{name}' is already registered with a different path set")]
    DuplicateName { name: String },

    /// The library manifest could not be read or parsed.
    #[error("invalid library manifest: {cause}")]
    Manifest { cause: String },
}

impl LoadError {
    /// Classify an OS loader diagnostic into the right variant.
    ///
    /// `dlopen` with `RTLD_NOW` reports missing symbols through the same
    /// channel as every other failure, so the distinction has to be made
    /// from the diagnostic text the platform loader produced.
    pub(crate) fn from_os_failure(name: &str, target: &str, cause: String) -> Self {
        let lower = cause.to_ascii_lowercase();
        if lower.contains("undefined symbol") || lower.contains("symbol not found") {
            LoadError::UnresolvedSymbols {
                name: name.to_string(),
                target: target.to_string(),
                cause,
            }
        } else {
            LoadError::LoadFailed {
                name: name.to_string(),
                target: target.to_string(),
                cause,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_failure_classification() {
        let e = LoadError::from_os_failure(
            "foo",
            "libfoo.so",
            "libfoo.so: undefined symbol: bar_init".into(),
        );
        assert!(matches!(e, LoadError::UnresolvedSymbols { .. }));

        let e = LoadError::from_os_failure(
            "foo",
            "libfoo.so",
            "libfoo.so: cannot open shared object file".into(),
        );
        assert!(matches!(e, LoadError::LoadFailed { .. }));

        // macOS dyld wording
        let e = LoadError::from_os_failure(
            "foo",
            "libfoo.dylib",
            "dlopen(libfoo.dylib): symbol not found in flat namespace '_bar'".into(),
        );
        assert!(matches!(e, LoadError::UnresolvedSymbols { .. }));
    }

    #[test]
    fn diagnostics_are_preserved_in_display() {
        let e = LoadError::from_os_failure("foo", "libfoo.so", "wrong ELF class".into());
        assert!(e.to_string().contains("wrong ELF class"));
    }
}

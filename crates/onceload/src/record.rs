// SPDX-License-Identifier: Apache-2.0
//! Memoized load outcomes.

use std::path::{Path, PathBuf};

use crate::error::LoadError;
use crate::key::RegistryKey;
use crate::policy::LoadSource;

/// Terminal result of the single load attempt made for a library name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The library is mapped into the process. `source` records which
    /// physical copy won, for diagnosing version-confusion bugs.
    Loaded { source: LoadSource },
    /// Every attempt the policy allowed failed; `error` is the last
    /// failure and is re-propagated on later calls without retrying.
    Failed { error: LoadError },
}

/// The loader's own memo of one attempted load, keyed by logical name.
///
/// Created exactly once per distinct name, the first time `ensure_loaded`
/// succeeds or exhaustively fails, and never mutated afterwards. Handed out
/// as `Arc<LoadRecord>`; every caller for a given name observes the same
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRecord {
    name: String,
    /// The path (or bare system name) of the final attempt. `None` when no
    /// attempt could even be made (no entry for this platform).
    resolved_path: Option<PathBuf>,
    key: RegistryKey,
    outcome: LoadOutcome,
}

impl LoadRecord {
    pub(crate) fn loaded(
        name: impl Into<String>,
        resolved_path: PathBuf,
        key: RegistryKey,
        source: LoadSource,
    ) -> Self {
        Self {
            name: name.into(),
            resolved_path: Some(resolved_path),
            key,
            outcome: LoadOutcome::Loaded { source },
        }
    }

    pub(crate) fn failed(
        name: impl Into<String>,
        resolved_path: Option<PathBuf>,
        error: LoadError,
    ) -> Self {
        Self {
            name: name.into(),
            resolved_path,
            key: RegistryKey::Unkeyed,
            outcome: LoadOutcome::Failed { error },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the final attempt asked the OS loader for: an absolute path for
    /// wheel loads, a bare filename for system loads (the OS does not
    /// report where its search actually found the file).
    pub fn resolved_path(&self) -> Option<&Path> {
        self.resolved_path.as_deref()
    }

    /// The loader-registry key future loads will be deduplicated by.
    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    pub fn outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }

    /// Which source satisfied the request, if the load succeeded.
    pub fn source(&self) -> Option<LoadSource> {
        match &self.outcome {
            LoadOutcome::Loaded { source } => Some(*source),
            LoadOutcome::Failed { .. } => None,
        }
    }
}

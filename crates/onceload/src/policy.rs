// SPDX-License-Identifier: Apache-2.0
//! Load resolution policy.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Which physical copy satisfied (or was asked to satisfy) a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    /// The copy bundled inside the wheel, loaded by absolute path.
    Wheel,
    /// A system-installed copy, resolved through the OS's normal search
    /// rules from a bare filename.
    System,
}

impl std::fmt::Display for LoadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadSource::Wheel => f.write_str("wheel"),
            LoadSource::System => f.write_str("system"),
        }
    }
}

/// Attempt-order strategy when a library could be satisfied by more than
/// one physical file.
///
/// This only orders *this process's own* load attempts. Every OS loader
/// honours "first successfully loaded copy with a given key wins for the
/// rest of the process", so no policy can displace a copy some unrelated
/// code loaded earlier. The [`crate::record::LoadRecord`] makes the actual
/// winner observable instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPolicy {
    /// Only the bundled copy; fail if it is missing. Never probes system
    /// locations. The strict default.
    #[default]
    WheelOnly,
    /// Only a system copy, via the OS search rules. For integrators who
    /// explicitly allow substitution.
    SystemOnly,
    /// Bundled copy first, system copy as fallback.
    PreferWheel,
    /// System copy first, bundled copy as fallback.
    PreferSystem,
}

impl LoadPolicy {
    /// The sources to try, in order.
    pub(crate) fn attempts(self) -> &'static [LoadSource] {
        match self {
            LoadPolicy::WheelOnly => &[LoadSource::Wheel],
            LoadPolicy::SystemOnly => &[LoadSource::System],
            LoadPolicy::PreferWheel => &[LoadSource::Wheel, LoadSource::System],
            LoadPolicy::PreferSystem => &[LoadSource::System, LoadSource::Wheel],
        }
    }

    /// The policy after applying the per-library environment override.
    ///
    /// `PREFER_{NAME}_SYSTEM_LIBRARY` (name uppercased, non-alphanumerics
    /// mapped to `_`) set to anything but `""`, `"0"` or `"false"` promotes
    /// a wheel-first policy to [`LoadPolicy::PreferSystem`] for that
    /// library only. `SystemOnly` is left alone.
    pub(crate) fn effective(self, name: &str) -> Self {
        if self == LoadPolicy::SystemOnly {
            return self;
        }
        let var = override_var_name(name);
        match std::env::var(&var) {
            Ok(v) if is_truthy(&v) => {
                tracing::info!("{var} is set; preferring system copy of '{name}'");
                LoadPolicy::PreferSystem
            }
            _ => self,
        }
    }
}

impl std::str::FromStr for LoadPolicy {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wheel-only" => Ok(LoadPolicy::WheelOnly),
            "system-only" => Ok(LoadPolicy::SystemOnly),
            "prefer-wheel" => Ok(LoadPolicy::PreferWheel),
            "prefer-system" => Ok(LoadPolicy::PreferSystem),
            other => Err(LoadError::Manifest {
                cause: format!("unknown load policy '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadPolicy::WheelOnly => "wheel-only",
            LoadPolicy::SystemOnly => "system-only",
            LoadPolicy::PreferWheel => "prefer-wheel",
            LoadPolicy::PreferSystem => "prefer-system",
        };
        f.write_str(name)
    }
}

fn override_var_name(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PREFER_{upper}_SYSTEM_LIBRARY")
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false")
}

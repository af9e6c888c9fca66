// SPDX-License-Identifier: Apache-2.0
//! The OS dynamic-load primitive, behind a seam.
//!
//! Production code goes through [`OsLoader`] (libloading). The seam exists
//! so the idempotence and concurrency properties of the loader can be
//! tested against a counting fake instead of a compiled fixture on every
//! platform; see [`crate::testing`].

use std::path::{Path, PathBuf};

/// One request to the OS loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadRequest {
    /// Load exactly this file; no search.
    Absolute(PathBuf),
    /// Hand a bare filename to the OS's normal search rules
    /// (`LD_LIBRARY_PATH`, default dirs, etc.).
    BareName(String),
}

impl LoadRequest {
    /// The string the request will be reported as in records and logs.
    pub fn target(&self) -> String {
        match self {
            LoadRequest::Absolute(p) => p.display().to_string(),
            LoadRequest::BareName(n) => n.clone(),
        }
    }

    pub(crate) fn target_path(&self) -> PathBuf {
        match self {
            LoadRequest::Absolute(p) => p.clone(),
            LoadRequest::BareName(n) => PathBuf::from(n),
        }
    }
}

/// An opaque handle keeping a loaded library mapped.
///
/// Dropping the handle would allow the OS to unmap the library, which is
/// never safe once other code may hold its symbols, so the loader retains
/// every handle for its own lifetime.
pub struct LibraryHandle {
    _library: Option<libloading::Library>,
}

impl LibraryHandle {
    pub(crate) fn from_library(library: libloading::Library) -> Self {
        Self {
            _library: Some(library),
        }
    }

    /// A handle with no OS resource behind it, for fakes.
    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn detached() -> Self {
        Self { _library: None }
    }
}

impl std::fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("backed", &self._library.is_some())
            .finish()
    }
}

/// The raw load operation. One call per request; no memoization here —
/// that is the [`crate::loader::LibraryLoader`]'s job.
///
/// Failures carry only the OS diagnostic string; classification into typed
/// errors happens in the caller, which knows the library's logical name.
pub trait LoadPrimitive: Send + Sync {
    fn load(&self, request: &LoadRequest) -> Result<LibraryHandle, String>;
}

/// The real thing: `dlopen` / `LoadLibraryW` via libloading, always with
/// local symbol visibility so the wheel's symbols cannot collide with
/// unrelated libraries process-wide.
#[derive(Debug, Default)]
pub struct OsLoader;

impl OsLoader {
    #[cfg(unix)]
    fn open(path: &Path) -> Result<libloading::Library, String> {
        use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};

        // RTLD_NOW: surface unresolved symbols at load time, where the
        // error taxonomy can report them, instead of at first call.
        unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL) }
            .map(Into::into)
            .map_err(|e| e.to_string())
    }

    #[cfg(windows)]
    fn open(path: &Path) -> Result<libloading::Library, String> {
        // Default Windows semantics are already per-module (no global
        // symbol namespace to pollute).
        unsafe { libloading::Library::new(path) }.map_err(|e| e.to_string())
    }
}

impl LoadPrimitive for OsLoader {
    fn load(&self, request: &LoadRequest) -> Result<LibraryHandle, String> {
        let library = match request {
            LoadRequest::Absolute(path) => Self::open(path)?,
            LoadRequest::BareName(name) => Self::open(Path::new(name))?,
        };
        Ok(LibraryHandle::from_library(library))
    }
}

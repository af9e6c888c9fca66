// SPDX-License-Identifier: Apache-2.0
//! A counting fake of the OS load primitive.
//!
//! Lets tests assert the protocol's properties — exactly one OS-level load
//! attempt per name, policy-driven attempt order, fallback — without
//! compiling shared libraries for every platform. Enable with the
//! `testing` feature from downstream crates.

use std::sync::Mutex;

use rustc_hash::FxHashSet;

use crate::primitive::{LibraryHandle, LoadPrimitive, LoadRequest};

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<String>,
    system_libs: FxHashSet<String>,
    failures: Vec<(String, String)>,
}

/// Fake [`LoadPrimitive`] that records every request it receives.
///
/// Behavior:
/// - Absolute-path requests succeed (the loader has already checked the
///   file exists) unless a configured failure matches.
/// - Bare-name requests succeed only for names registered with
///   [`with_system_lib`](Self::with_system_lib).
/// - A configured failure (substring match on the target) wins over both,
///   returning its canned OS diagnostic.
#[derive(Debug, Default)]
pub struct FakeLoader {
    state: Mutex<FakeState>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `name` is installed system-wide and resolvable by the OS
    /// search rules.
    #[must_use]
    pub fn with_system_lib(self, name: impl Into<String>) -> Self {
        self.lock().system_libs.insert(name.into());
        self
    }

    /// Fail any request whose target contains `substring`, with `cause` as
    /// the simulated OS diagnostic.
    #[must_use]
    pub fn fail_matching(self, substring: impl Into<String>, cause: impl Into<String>) -> Self {
        self.lock().failures.push((substring.into(), cause.into()));
        self
    }

    /// Number of OS-level load attempts observed.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Every target attempted, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// Tests hand the loader a clone and keep one to inspect the call log.
impl LoadPrimitive for std::sync::Arc<FakeLoader> {
    fn load(&self, request: &LoadRequest) -> Result<LibraryHandle, String> {
        self.as_ref().load(request)
    }
}

impl LoadPrimitive for FakeLoader {
    fn load(&self, request: &LoadRequest) -> Result<LibraryHandle, String> {
        let target = request.target();
        let mut state = self.lock();
        state.calls.push(target.clone());

        if let Some((_, cause)) = state.failures.iter().find(|(s, _)| target.contains(s)) {
            return Err(cause.clone());
        }
        match request {
            LoadRequest::Absolute(_) => Ok(LibraryHandle::detached()),
            LoadRequest::BareName(name) => {
                if state.system_libs.contains(name) {
                    Ok(LibraryHandle::detached())
                } else {
                    Err(format!("{name}: cannot open shared object file: No such file or directory"))
                }
            }
        }
    }
}

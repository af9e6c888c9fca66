// SPDX-License-Identifier: Apache-2.0
//! The load-once registry.
//!
//! One [`LibraryLoader`] per logical namespace (normally a process-wide
//! singleton created at package init). Its contract: at most one OS-level
//! load attempt per library name per process, with the outcome memoized as
//! an immutable [`LoadRecord`].
//!
//! Every platform's loader treats "first successfully loaded copy with a
//! given key wins for the rest of the process", so the only way a wheel can
//! guarantee its dependents resolve against *its* copy is to force the load
//! earlier than any competing code path. `ensure_loaded` is therefore meant
//! to be called unconditionally and early — at import/initialization time —
//! not lazily on first use.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::descriptor::LibraryDescriptor;
use crate::error::{LoadError, Result};
use crate::key::{self, RegistryKey};
use crate::platform::Platform;
use crate::policy::{LoadPolicy, LoadSource};
use crate::primitive::{LibraryHandle, LoadPrimitive, LoadRequest, OsLoader};
use crate::record::LoadRecord;

#[derive(Default)]
struct LoaderState {
    descriptors: FxHashMap<String, LibraryDescriptor>,
    records: FxHashMap<String, Arc<LoadRecord>>,
    // Handles are retained for the loader's lifetime; dropping one could
    // unmap a library other code already depends on.
    handles: Vec<LibraryHandle>,
}

/// Stateful registry of native libraries for one exporting package.
///
/// All methods take `&self`; a single mutex over the descriptor and record
/// tables serializes the `ensure_loaded` critical section, so concurrent
/// callers for the same name block until the first attempt resolves and
/// then observe its record.
pub struct LibraryLoader {
    platform: Platform,
    policy: LoadPolicy,
    primitive: Box<dyn LoadPrimitive>,
    inner: Mutex<LoaderState>,
}

impl LibraryLoader {
    /// A loader for the running platform, backed by the real OS primitive.
    pub fn new(policy: LoadPolicy) -> Self {
        Self::with_primitive(policy, Platform::current(), Box::new(OsLoader))
    }

    /// A loader with an explicit platform and load primitive. The seam for
    /// tests; production code wants [`LibraryLoader::new`].
    pub fn with_primitive(
        policy: LoadPolicy,
        platform: Platform,
        primitive: Box<dyn LoadPrimitive>,
    ) -> Self {
        Self {
            platform,
            policy,
            primitive,
            inner: Mutex::new(LoaderState::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Register a library descriptor.
    ///
    /// Re-registering identical data is a no-op, so module re-initialization
    /// is harmless. A conflicting re-register is a programming error and
    /// fails with [`LoadError::DuplicateName`].
    pub fn register(&self, descriptor: LibraryDescriptor) -> Result<()> {
        let mut state = self.lock();
        match state.descriptors.get(descriptor.name()) {
            Some(existing) if *existing == descriptor => Ok(()),
            Some(_) => Err(LoadError::DuplicateName {
                name: descriptor.name().to_string(),
            }),
            None => {
                tracing::debug!("registered library '{}'", descriptor.name());
                state
                    .descriptors
                    .insert(descriptor.name().to_string(), descriptor);
                Ok(())
            }
        }
    }

    /// Register several descriptors, stopping at the first conflict.
    pub fn register_all(
        &self,
        descriptors: impl IntoIterator<Item = LibraryDescriptor>,
    ) -> Result<()> {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Idempotently load `name`, memoizing the outcome.
    ///
    /// The fast path returns the existing record without touching the OS
    /// loader. Otherwise the platform path is resolved from the descriptor,
    /// the policy's attempt order is walked, and exactly one record is
    /// created — for success or for exhaustive failure. A memoized failure
    /// re-propagates the same error without retrying: load failures are
    /// deterministic while the filesystem and process are unchanged.
    pub fn ensure_loaded(&self, name: &str) -> Result<Arc<LoadRecord>> {
        let mut state = self.lock();

        if let Some(record) = state.records.get(name) {
            tracing::debug!("library '{name}' already attempted; returning memoized record");
            return Self::replay(record);
        }

        let descriptor = match state.descriptors.get(name) {
            Some(d) => d.clone(),
            // Unregistered names get no record: there is no descriptor to
            // hold the "at most one record per descriptor" invariant for.
            None => {
                return Err(LoadError::NotRegistered {
                    name: name.to_string(),
                });
            }
        };

        let outcome = self.attempt(&descriptor);
        let record = Arc::new(match outcome {
            Ok((request, key, source, handle)) => {
                state.handles.push(handle);
                let target = request.target_path();
                tracing::info!(
                    "loaded '{name}' from {source} copy '{}' (registry key {key})",
                    target.display(),
                );
                if !key.is_keyed() && self.platform != Platform::Windows {
                    tracing::warn!(
                        "library '{name}' has no SONAME/install name; the OS loader will \
                         not deduplicate further loads of it"
                    );
                }
                LoadRecord::loaded(name, target, key, source)
            }
            Err((last_target, error)) => {
                tracing::warn!("library '{name}' failed to load: {error}");
                LoadRecord::failed(name, last_target.map(|r| r.target_path()), error)
            }
        });
        state.records.insert(name.to_string(), Arc::clone(&record));
        Self::replay(&record)
    }

    /// Load every registered library, in name order, failing on the first
    /// error. The exporter-side "load the whole wheel at import" entry
    /// point.
    pub fn load_all(&self) -> Result<()> {
        let mut names: Vec<String> = {
            let state = self.lock();
            state.descriptors.keys().cloned().collect()
        };
        names.sort();
        for name in names {
            self.ensure_loaded(&name)?;
        }
        Ok(())
    }

    /// Whether `name` has been loaded successfully. Never triggers a load;
    /// returns `false` for unknown, unattempted, and failed names.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.lock()
            .records
            .get(name)
            .is_some_and(|r| r.is_loaded())
    }

    /// The memoized record for `name`, if an attempt happened.
    pub fn record(&self, name: &str) -> Option<Arc<LoadRecord>> {
        self.lock().records.get(name).cloned()
    }

    // Walk the policy's attempt order. On success returns the winning
    // request, key, source and handle; on exhaustion returns the last
    // attempted request and the last error.
    #[allow(clippy::type_complexity)]
    fn attempt(
        &self,
        descriptor: &LibraryDescriptor,
    ) -> std::result::Result<
        (LoadRequest, RegistryKey, LoadSource, LibraryHandle),
        (Option<LoadRequest>, LoadError),
    > {
        let name = descriptor.name();
        let policy = self.policy.effective(name);

        let mut last: Option<(LoadRequest, LoadError)> = None;
        for &source in policy.attempts() {
            let (request, declared_key) = match self.build_request(descriptor, source) {
                Ok(pair) => pair,
                Err(error) => return Err((last.map(|(r, _)| r), error)),
            };

            if let LoadRequest::Absolute(path) = &request {
                if !path.exists() {
                    tracing::debug!(
                        "'{name}': {source} copy missing at '{}'",
                        path.display()
                    );
                    last = Some((
                        request.clone(),
                        LoadError::FileMissing {
                            name: name.to_string(),
                            path: path.clone(),
                        },
                    ));
                    continue;
                }
            }

            match self.primitive.load(&request) {
                Ok(handle) => {
                    let key = self.derive_key(&request, declared_key.as_deref());
                    return Ok((request, key, source, handle));
                }
                Err(cause) => {
                    tracing::debug!("'{name}': {source} attempt '{}' failed: {cause}", request.target());
                    let error = LoadError::from_os_failure(name, &request.target(), cause);
                    last = Some((request, error));
                }
            }
        }

        match last {
            Some((request, error)) => Err((Some(request), error)),
            // attempts() is never empty; reaching here means the descriptor
            // had no entry at all for this platform.
            None => Err((
                None,
                LoadError::NotFoundOnPlatform {
                    name: name.to_string(),
                    platform: self.platform,
                },
            )),
        }
    }

    fn build_request(
        &self,
        descriptor: &LibraryDescriptor,
        source: LoadSource,
    ) -> Result<(LoadRequest, Option<String>)> {
        match source {
            LoadSource::Wheel => {
                let (path, declared) = descriptor.bundled_entry(self.platform)?;
                Ok((
                    LoadRequest::Absolute(path.to_path_buf()),
                    declared.map(str::to_string),
                ))
            }
            LoadSource::System => {
                let bare = descriptor.system_name(self.platform)?;
                Ok((LoadRequest::BareName(bare.clone()), Some(bare)))
            }
        }
    }

    // Key derivation: wheel loads read the file's embedded metadata; system
    // loads have no known path, so the bare name asked for stands in as the
    // declared key (exact on Windows, best-effort elsewhere).
    fn derive_key(&self, request: &LoadRequest, declared: Option<&str>) -> RegistryKey {
        match request {
            LoadRequest::Absolute(path) => key::registry_key(self.platform, path, declared),
            LoadRequest::BareName(bare) => {
                key::registry_key(self.platform, std::path::Path::new(bare), declared)
            }
        }
    }

    fn replay(record: &Arc<LoadRecord>) -> Result<Arc<LoadRecord>> {
        match record.outcome() {
            crate::record::LoadOutcome::Loaded { .. } => Ok(Arc::clone(record)),
            crate::record::LoadOutcome::Failed { error } => Err(error.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LibraryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LibraryLoader")
            .field("platform", &self.platform)
            .field("policy", &self.policy)
            .field("registered", &state.descriptors.len())
            .field("attempted", &state.records.len())
            .finish_non_exhaustive()
    }
}

// SPDX-License-Identifier: Apache-2.0
//! # onceload-probe
//!
//! Defensive counterpart to [`onceload`] for *dependent* packages.
//!
//! A consumer that merely benefits from a native dependency — an optional
//! accelerator, a pluggable codec — should not take a hard import-time
//! dependency on the exporting wheel being installed. The probe wraps the
//! exporter's [`LibraryLoader`] and converts every failure, including
//! "never registered at all", into plain absence. The dependency is still
//! forced into the OS loader registry *before* the consumer's own native
//! extension loads, so when it is present, the extension resolves against
//! the exporter's copy rather than triggering a fresh filesystem search.
//!
//! Required dependencies must not use the probe: they call
//! [`LibraryLoader::ensure_loaded`] directly and let the error propagate at
//! initialization time, where it is still cheap to diagnose.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use onceload::{LibraryLoader, LoadPolicy};
//! use onceload_probe::ConsumerProbe;
//!
//! // Normally obtained from the exporting package's init.
//! let loader = Arc::new(LibraryLoader::new(LoadPolicy::WheelOnly));
//!
//! let probe = ConsumerProbe::new(Arc::clone(&loader));
//! if let Some(record) = probe.probe("zstd") {
//!     println!("accelerated path available, keyed {}", record.key());
//! } else {
//!     // degrade gracefully
//! }
//! ```

use std::sync::Arc;

use onceload::{LibraryLoader, LoadRecord};

/// A probe over an exporter's loader that never raises.
///
/// `probe` has exactly the `ensure_loaded` semantics underneath — same
/// memoization, same at-most-one OS attempt — but trades the typed error
/// surface for an `Option`, by design.
#[derive(Debug, Clone)]
pub struct ConsumerProbe {
    loader: Arc<LibraryLoader>,
}

impl ConsumerProbe {
    pub fn new(loader: Arc<LibraryLoader>) -> Self {
        Self { loader }
    }

    /// Ensure `name` is loaded if at all possible; `None` on any failure.
    ///
    /// Never panics and never propagates an error. The suppressed cause is
    /// logged at debug level so a missing optional dependency stays
    /// diagnosable without becoming noisy.
    pub fn probe(&self, name: &str) -> Option<Arc<LoadRecord>> {
        match self.loader.ensure_loaded(name) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::debug!("optional library '{name}' unavailable: {error}");
                None
            }
        }
    }

    /// Whether `name` is currently resolvable. `probe` without keeping the
    /// record.
    pub fn is_available(&self, name: &str) -> bool {
        self.probe(name).is_some()
    }

    /// The underlying loader, for consumers that graduate a dependency
    /// from optional to required.
    pub fn loader(&self) -> &Arc<LibraryLoader> {
        &self.loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use onceload::testing::FakeLoader;
    use onceload::{LibraryDescriptor, LoadPolicy, Platform};

    fn probe_with(fake: FakeLoader) -> ConsumerProbe {
        let loader = Arc::new(LibraryLoader::with_primitive(
            LoadPolicy::WheelOnly,
            Platform::Linux,
            Box::new(fake),
        ));
        ConsumerProbe::new(loader)
    }

    #[test]
    fn probe_of_unregistered_name_is_none_and_never_panics() {
        let probe = probe_with(FakeLoader::new());
        assert!(probe.probe("missing-lib").is_none());
        assert!(!probe.is_available("missing-lib"));
        // Repeated probes stay quiet too.
        assert!(probe.probe("missing-lib").is_none());
    }

    #[test]
    fn probe_of_missing_file_is_none() {
        let probe = probe_with(FakeLoader::new());
        probe
            .loader()
            .register(
                LibraryDescriptor::new("foo").with_path(Platform::Linux, "/nonexistent/libfoo.so"),
            )
            .unwrap();
        assert!(probe.probe("foo").is_none());
        assert!(!probe.loader().is_loaded("foo"));
    }

    #[test]
    fn probe_returns_the_record_when_the_dependency_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libfoo.so");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"\x00stub\x00")
            .unwrap();

        let probe = probe_with(FakeLoader::new());
        probe
            .loader()
            .register(LibraryDescriptor::new("foo").with_path(Platform::Linux, &path))
            .unwrap();

        let record = probe.probe("foo").expect("fixture should load");
        assert!(record.is_loaded());
        assert!(probe.is_available("foo"));

        // Probe and direct ensure_loaded share one memoized record.
        let direct = probe.loader().ensure_loaded("foo").unwrap();
        assert!(Arc::ptr_eq(&record, &direct));
    }
}

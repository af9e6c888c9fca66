// SPDX-License-Identifier: Apache-2.0
//! # onceload
//!
//! Load-once protocol for native libraries shipped inside wheels.
//!
//! A package that bundles a shared library needs every later consumer in
//! the process — other wheels, extension modules, plugins — to resolve
//! against *its* copy, without RPATH gymnastics or `LD_LIBRARY_PATH`
//! conventions. The lever this crate pulls is the OS loader's own dedup
//! registry: once a library with a given key is mapped, every platform
//! resolves future references to that key against the already-loaded copy.
//! So the exporter loads its libraries exactly once, early, with local
//! symbol visibility, and records what happened.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────────────┐
//!                │  exporting wheel    │  (package init)
//!                └─────────┬──────────┘
//!                          │ LibraryDescriptor / LibraryManifest
//!                ┌─────────┴──────────┐
//!                │      onceload      │
//!                │                    │
//!                │  LibraryLoader     │ ← ensure_loaded: one OS call per name
//!                │  LoadPolicy        │ ← wheel vs system attempt order
//!                │  RegistryKey       │ ← SONAME / install name / filename
//!                │  LoadRecord        │ ← memoized, observable outcome
//!                └─────────┬──────────┘
//!                          │ dlopen(RTLD_LOCAL|RTLD_NOW) / LoadLibraryW
//!                ┌─────────┴──────────┐
//!                │  OS loader registry │  first loaded copy wins
//!                └────────────────────┘
//! ```
//!
//! Consumers that only *optionally* depend on an exporter use the sibling
//! `onceload-probe` crate, which converts every failure into absence.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use onceload::{LibraryDescriptor, LibraryLoader, LoadPolicy, Platform};
//!
//! let loader = LibraryLoader::new(LoadPolicy::WheelOnly);
//! loader.register(
//!     LibraryDescriptor::new("foo")
//!         .with_keyed_path(Platform::Linux, "/wheel/lib/libfoo.so", "libfoo.so.2")
//!         .with_path(Platform::MacOs, "/wheel/lib/libfoo.dylib")
//!         .with_path(Platform::Windows, "/wheel/lib/foo.dll"),
//! ).expect("conflicting registration");
//!
//! // At import time, unconditionally: first loaded copy wins process-wide.
//! let record = loader.ensure_loaded("foo").expect("required library");
//! println!("loaded from {:?} keyed as {}", record.resolved_path(), record.key());
//! ```
//!
//! What this crate deliberately does not do: unload anything (never safe
//! once symbols may be referenced), arbitrate between incompatible versions
//! (the OS registry's "first wins" is not overridable), or solve ABI
//! compatibility.

pub mod descriptor;
pub mod error;
pub mod key;
pub mod loader;
pub mod manifest;
pub mod platform;
pub mod policy;
pub mod primitive;
pub mod record;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export the most commonly used types at crate root.
pub use descriptor::{LibraryDescriptor, PlatformEntry};
pub use error::{LoadError, Result};
pub use key::RegistryKey;
pub use loader::LibraryLoader;
pub use manifest::LibraryManifest;
pub use platform::Platform;
pub use policy::{LoadPolicy, LoadSource};
pub use record::{LoadOutcome, LoadRecord};

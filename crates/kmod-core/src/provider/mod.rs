//! Module metadata providers.
//!
//! A provider is the read-only source of truth about kernel modules: it
//! enumerates loaded modules, resolves a module by name, walks holder
//! relationships and returns the raw `(key, value)` info records of a module.
//!
//! Handles are plain owned values. Whatever a provider hands out is dropped
//! at the end of the call that asked for it; nothing is cached across calls.

mod kernel;
mod memory;
pub mod modinfo;

pub use kernel::KernelProvider;
pub use memory::{InMemoryModule, InMemoryProvider};

use crate::Result;

/// Where a resolved module comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    /// Currently loaded into the running kernel.
    Loaded,
    /// Compiled into the kernel image.
    Builtin,
    /// Known on disk but not loaded.
    Available,
}

/// A module as seen by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHandle {
    /// Canonical name (dashes normalized to underscores).
    pub name: String,
    /// Absolute path of the module object, if it has one.
    pub path: Option<String>,
    /// Size in bytes of the loaded module (0 when not loaded).
    pub size: i64,
    /// Current reference count (0 when not loaded).
    pub use_count: i64,
    pub origin: ModuleOrigin,
}

impl ModuleHandle {
    /// Create a handle for a loaded module.
    pub fn loaded(name: impl Into<String>, size: i64, use_count: i64) -> Self {
        Self {
            name: name.into(),
            path: None,
            size,
            use_count,
            origin: ModuleOrigin::Loaded,
        }
    }

    /// Set the module object path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// One raw `key=value` record of module metadata. Keys repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRecord {
    pub key: String,
    pub value: String,
}

impl InfoRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a `key=value` string, splitting on the first `=`.
    ///
    /// A string without `=` becomes a key with an empty value.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Self::new(key, value),
            None => Self::new(raw, ""),
        }
    }
}

/// Read-only contract every module metadata source implements.
///
/// Calls are synchronous; the server never issues two at the same time.
pub trait ModuleProvider: Send + Sync + 'static {
    /// Enumerate the currently loaded modules, in provider order.
    fn loaded_modules(&self) -> Result<Vec<ModuleHandle>>;

    /// Resolve a module by name.
    ///
    /// Fails with [`crate::KmodError::ModuleNotFound`] when the name is unknown.
    fn resolve(&self, name: &str) -> Result<ModuleHandle>;

    /// Modules holding a reference on `module`, in provider order.
    ///
    /// Only the names of holder handles are meaningful.
    fn holders(&self, module: &ModuleHandle) -> Result<Vec<ModuleHandle>>;

    /// Raw info records of `module`.
    fn info_records(&self, module: &ModuleHandle) -> Result<Vec<InfoRecord>>;
}

/// Normalize a module name the way the kernel does: `-` becomes `_`.
pub fn normalize_name(name: &str) -> String {
    name.replace('-', "_")
}

//! In-memory provider.
//!
//! Serves a fixed module table. Used when embedding the marshalers without a
//! kernel behind them, and throughout the test suites.

use super::{normalize_name, InfoRecord, ModuleHandle, ModuleOrigin, ModuleProvider};
use crate::{KmodError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One entry of an [`InMemoryProvider`].
#[derive(Debug, Clone)]
pub struct InMemoryModule {
    pub handle: ModuleHandle,
    /// Names of the modules holding this one.
    pub holders: Vec<String>,
    /// `None` means info retrieval fails for this module.
    pub records: Option<Vec<InfoRecord>>,
}

impl InMemoryModule {
    /// A loaded module with no holders and no records.
    pub fn loaded(name: &str, size: i64, use_count: i64) -> Self {
        Self {
            handle: ModuleHandle::loaded(name, size, use_count),
            holders: Vec::new(),
            records: Some(Vec::new()),
        }
    }

    /// A module that resolves but is not loaded.
    pub fn available(name: &str, path: &str) -> Self {
        Self {
            handle: ModuleHandle {
                name: name.to_string(),
                path: Some(path.to_string()),
                size: 0,
                use_count: 0,
                origin: ModuleOrigin::Available,
            },
            holders: Vec::new(),
            records: Some(Vec::new()),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.handle.path = Some(path.to_string());
        self
    }

    pub fn with_holders(mut self, holders: &[&str]) -> Self {
        self.holders = holders.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn with_record(mut self, key: &str, value: &str) -> Self {
        self.records
            .get_or_insert_with(Vec::new)
            .push(InfoRecord::new(key, value));
        self
    }

    pub fn without_info(mut self) -> Self {
        self.records = None;
        self
    }
}

/// Provider backed by a fixed table of modules.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    modules: Vec<InMemoryModule>,
    broken: bool,
    queries: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new(modules: Vec<InMemoryModule>) -> Self {
        Self {
            modules,
            broken: false,
            queries: AtomicUsize::new(0),
        }
    }

    /// A provider whose every query fails.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    /// Number of queries answered so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn begin_query(&self) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(KmodError::Provider {
                message: "module table unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&InMemoryModule> {
        self.modules.iter().find(|m| m.handle.name == name)
    }
}

impl ModuleProvider for InMemoryProvider {
    fn loaded_modules(&self) -> Result<Vec<ModuleHandle>> {
        self.begin_query()?;
        Ok(self
            .modules
            .iter()
            .filter(|m| m.handle.origin == ModuleOrigin::Loaded)
            .map(|m| m.handle.clone())
            .collect())
    }

    fn resolve(&self, name: &str) -> Result<ModuleHandle> {
        self.begin_query()?;
        let name = normalize_name(name);
        self.find(&name)
            .map(|m| m.handle.clone())
            .ok_or(KmodError::ModuleNotFound { name })
    }

    fn holders(&self, module: &ModuleHandle) -> Result<Vec<ModuleHandle>> {
        self.begin_query()?;
        let entry = self
            .find(&module.name)
            .ok_or_else(|| KmodError::ModuleNotFound {
                name: module.name.clone(),
            })?;
        Ok(entry
            .holders
            .iter()
            .map(|holder| match self.find(holder) {
                Some(m) => m.handle.clone(),
                None => ModuleHandle::loaded(holder.as_str(), 0, 0),
            })
            .collect())
    }

    fn info_records(&self, module: &ModuleHandle) -> Result<Vec<InfoRecord>> {
        self.begin_query()?;
        self.find(&module.name)
            .and_then(|m| m.records.clone())
            .ok_or_else(|| KmodError::NoInfoAvailable {
                name: module.name.clone(),
                reason: "no records".to_string(),
            })
    }
}

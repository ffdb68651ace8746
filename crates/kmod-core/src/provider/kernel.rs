//! Provider backed by the running kernel.
//!
//! Loaded modules come from `/proc/modules`, holders from
//! `/sys/module/<name>/holders`, module objects from `modules.dep` and
//! built-in modules from `modules.builtin` under `/lib/modules/<release>`.
//! Every query re-reads the files it needs.

use super::modinfo::{builtin_modinfo, modinfo_from_elf, read_module_file};
use super::{normalize_name, InfoRecord, ModuleHandle, ModuleOrigin, ModuleProvider};
use crate::config::{ProviderConfig, ProviderPaths};
use crate::{KmodError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// One parsed line of `/proc/modules`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcModule {
    name: String,
    size: i64,
    use_count: i64,
}

impl ProcModule {
    /// Parse `name size refcount deps state address`.
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let name = fields.next()?.to_string();
        let size = fields.next()?.parse().ok()?;
        let use_count = match fields.next() {
            Some("-") | None => 0,
            Some(count) => count.parse().ok()?,
        };
        Some(Self {
            name,
            size,
            use_count,
        })
    }
}

/// Module provider reading procfs, sysfs and the modules directory.
#[derive(Debug, Clone)]
pub struct KernelProvider {
    paths: ProviderPaths,
}

impl KernelProvider {
    pub fn new(paths: ProviderPaths) -> Self {
        debug!(
            "Kernel module provider: proc={}, sys={}, modules={}",
            paths.proc_modules.display(),
            paths.sys_module.display(),
            paths.modules_dir.display()
        );
        Self { paths }
    }

    fn proc_modules(&self) -> Result<Vec<ProcModule>> {
        let content = std::fs::read_to_string(&self.paths.proc_modules).map_err(|e| {
            KmodError::Provider {
                message: format!("{}: {}", self.paths.proc_modules.display(), e),
            }
        })?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = ProcModule::parse(line);
                if parsed.is_none() {
                    warn!("Skipping malformed /proc/modules line: {:?}", line);
                }
                parsed
            })
            .collect())
    }

    /// Look up the module object path of `name` in `modules.dep`.
    fn dep_path(&self, name: &str) -> Result<Option<String>> {
        let dep_file = self.paths.modules_dir.join(ProviderConfig::MODULES_DEP);
        let Some(content) = read_optional(&dep_file)? else {
            return Ok(None);
        };

        for line in content.lines() {
            let Some((object, _deps)) = line.split_once(':') else {
                continue;
            };
            let object = object.trim();
            if module_name_of(object).as_deref() == Some(name) {
                return Ok(Some(self.absolute(object)));
            }
        }
        Ok(None)
    }

    fn is_builtin(&self, name: &str) -> Result<bool> {
        let builtin = self.paths.modules_dir.join(ProviderConfig::MODULES_BUILTIN);
        let Some(content) = read_optional(&builtin)? else {
            return Ok(false);
        };
        Ok(content
            .lines()
            .any(|line| module_name_of(line.trim()).as_deref() == Some(name)))
    }

    fn absolute(&self, object: &str) -> String {
        let path = Path::new(object);
        if path.is_absolute() {
            object.to_string()
        } else {
            self.paths.modules_dir.join(path).to_string_lossy().into_owned()
        }
    }

}

impl ModuleProvider for KernelProvider {
    fn loaded_modules(&self) -> Result<Vec<ModuleHandle>> {
        Ok(self
            .proc_modules()?
            .into_iter()
            .map(|m| ModuleHandle::loaded(m.name, m.size, m.use_count))
            .collect())
    }

    fn resolve(&self, name: &str) -> Result<ModuleHandle> {
        let name = normalize_name(name);
        let path = self.dep_path(&name)?;

        if let Some(m) = self.proc_modules()?.into_iter().find(|m| m.name == name) {
            let mut handle = ModuleHandle::loaded(m.name, m.size, m.use_count);
            handle.path = path;
            return Ok(handle);
        }

        if let Some(path) = path {
            return Ok(ModuleHandle {
                name,
                path: Some(path),
                size: 0,
                use_count: 0,
                origin: ModuleOrigin::Available,
            });
        }

        if self.is_builtin(&name)? {
            return Ok(ModuleHandle {
                name,
                path: None,
                size: 0,
                use_count: 0,
                origin: ModuleOrigin::Builtin,
            });
        }

        Err(KmodError::ModuleNotFound { name })
    }

    fn holders(&self, module: &ModuleHandle) -> Result<Vec<ModuleHandle>> {
        let dir = self.paths.sys_module.join(&module.name).join("holders");
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KmodError::io_with_path(e, dir)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KmodError::io_with_path(e, &dir))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| ModuleHandle::loaded(name, 0, 0))
            .collect())
    }

    fn info_records(&self, module: &ModuleHandle) -> Result<Vec<InfoRecord>> {
        let no_info = |reason: String| KmodError::NoInfoAvailable {
            name: module.name.clone(),
            reason,
        };

        if let Some(path) = &module.path {
            let bytes = read_module_file(Path::new(path)).map_err(|e| no_info(e.to_string()))?;
            return modinfo_from_elf(&bytes).map_err(|e| no_info(e.to_string()));
        }

        if module.origin == ModuleOrigin::Builtin {
            let file = self
                .paths
                .modules_dir
                .join(ProviderConfig::MODULES_BUILTIN_MODINFO);
            let data = std::fs::read(&file).map_err(|e| no_info(e.to_string()))?;
            let records = builtin_modinfo(&data, &module.name);
            if records.is_empty() {
                return Err(no_info("not listed in modules.builtin.modinfo".into()));
            }
            return Ok(records);
        }

        Err(no_info("no module object".into()))
    }
}

/// Read a file that may legitimately be absent.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KmodError::io_with_path(e, path)),
    }
}

/// Module name of a `modules.dep` / `modules.builtin` object path:
/// `kernel/drivers/block/loop.ko.zst` is `loop`.
fn module_name_of(object: &str) -> Option<String> {
    let file = object.rsplit('/').next()?;
    let file = [".gz", ".zst", ".xz"]
        .iter()
        .find_map(|ext| file.strip_suffix(ext))
        .unwrap_or(file);
    let stem = file.strip_suffix(".ko")?;
    if stem.is_empty() {
        return None;
    }
    Some(normalize_name(stem))
}

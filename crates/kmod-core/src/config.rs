//! Centralized configuration for kmod-core.
//!
//! Service identity, protocol limits and the filesystem locations the
//! kernel-backed provider reads from.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identity and limits of the varlink service.
pub struct ServiceConfig;

impl ServiceConfig {
    pub const VENDOR: &'static str = "Kernel";
    pub const PRODUCT: &'static str = "Kernel Module Information";
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
    pub const URL: &'static str = "https://git.kernel.org/pub/scm/utils/kernel/kmod/kmod.git";

    /// Largest accepted message, excluding the NUL terminator.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    pub const MAX_CONNECTIONS: usize = 256;

    /// How long shutdown waits for replies that are still being written.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}

/// Default locations used by the kernel-backed provider.
pub struct ProviderConfig;

impl ProviderConfig {
    pub const PROC_MODULES: &'static str = "proc/modules";
    pub const OSRELEASE: &'static str = "proc/sys/kernel/osrelease";
    pub const SYS_MODULE_DIR: &'static str = "sys/module";
    pub const MODULES_DIR: &'static str = "lib/modules";
    pub const MODULES_DEP: &'static str = "modules.dep";
    pub const MODULES_BUILTIN: &'static str = "modules.builtin";
    pub const MODULES_BUILTIN_MODINFO: &'static str = "modules.builtin.modinfo";
    pub const MODINFO_SECTION: &'static str = ".modinfo";
}

/// Resolved filesystem paths for one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPaths {
    /// `/proc/modules` (or its equivalent under a test root).
    pub proc_modules: PathBuf,
    /// `/sys/module`.
    pub sys_module: PathBuf,
    /// `/lib/modules/<release>`.
    pub modules_dir: PathBuf,
}

impl ProviderPaths {
    /// Build paths under `root` for the given kernel release.
    pub fn for_release(root: impl AsRef<Path>, release: &str) -> Self {
        let root = root.as_ref();
        Self {
            proc_modules: root.join(ProviderConfig::PROC_MODULES),
            sys_module: root.join(ProviderConfig::SYS_MODULE_DIR),
            modules_dir: root.join(ProviderConfig::MODULES_DIR).join(release),
        }
    }

    /// Build paths under `root`, reading the running kernel's release from
    /// `<root>/proc/sys/kernel/osrelease`.
    pub fn detect(root: impl AsRef<Path>) -> crate::Result<Self> {
        let root = root.as_ref();
        let osrelease = root.join(ProviderConfig::OSRELEASE);
        let release = std::fs::read_to_string(&osrelease)
            .map_err(|e| crate::KmodError::io_with_path(e, &osrelease))?;
        Ok(Self::for_release(root, release.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_for_release() {
        let paths = ProviderPaths::for_release("/srv/root", "6.8.0-test");
        assert_eq!(paths.proc_modules, PathBuf::from("/srv/root/proc/modules"));
        assert_eq!(paths.sys_module, PathBuf::from("/srv/root/sys/module"));
        assert_eq!(
            paths.modules_dir,
            PathBuf::from("/srv/root/lib/modules/6.8.0-test")
        );
    }

    #[test]
    fn test_detect_reads_osrelease() {
        let temp_dir = TempDir::new().unwrap();
        let kernel_dir = temp_dir.path().join("proc/sys/kernel");
        std::fs::create_dir_all(&kernel_dir).unwrap();
        std::fs::write(kernel_dir.join("osrelease"), "6.1.0-fixture\n").unwrap();

        let paths = ProviderPaths::detect(temp_dir.path()).unwrap();
        assert!(paths.modules_dir.ends_with("lib/modules/6.1.0-fixture"));
    }

    #[test]
    fn test_detect_without_osrelease_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(ProviderPaths::detect(temp_dir.path()).is_err());
    }
}

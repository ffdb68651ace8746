//! `List` marshaling.

use crate::models::ModuleSummary;
use crate::provider::ModuleProvider;
use crate::Result;
use tracing::{debug, warn};

/// Summarize every loaded module, in provider order.
///
/// A module whose holders cannot be read is listed with an empty `used_by`.
/// Only a failure to enumerate the loaded modules fails the call.
pub fn module_list<P: ModuleProvider + ?Sized>(provider: &P) -> Result<Vec<ModuleSummary>> {
    let modules = provider.loaded_modules()?;
    let mut summaries = Vec::with_capacity(modules.len());

    for module in modules {
        let used_by = match provider.holders(&module) {
            Ok(holders) => holders.into_iter().map(|h| h.name).collect(),
            Err(e) => {
                warn!("Cannot read holders of {}: {}", module.name, e);
                Vec::new()
            }
        };

        summaries.push(ModuleSummary {
            name: module.name,
            size: module.size,
            use_count: module.use_count,
            used_by,
        });
    }

    debug!("Listed {} loaded modules", summaries.len());
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InMemoryModule, InMemoryProvider};
    use crate::KmodError;

    #[test]
    fn test_list_preserves_order_and_holders() {
        let provider = InMemoryProvider::new(vec![
            InMemoryModule::loaded("snd_pcm", 196608, 2)
                .with_holders(&["snd_hda_intel", "snd_hda_codec"]),
            InMemoryModule::loaded("snd_hda_intel", 61440, 0),
            InMemoryModule::available("zram", "/lib/modules/x/zram.ko"),
            InMemoryModule::loaded("snd_hda_codec", 204800, 1).with_holders(&["snd_hda_intel"]),
        ]);

        let list = module_list(&provider).unwrap();
        let names: Vec<&str> = list.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["snd_pcm", "snd_hda_intel", "snd_hda_codec"]);
        assert_eq!(list[0].size, 196608);
        assert_eq!(list[0].use_count, 2);
        assert_eq!(list[0].used_by, vec!["snd_hda_intel", "snd_hda_codec"]);
        assert!(list[1].used_by.is_empty());
    }

    #[test]
    fn test_empty_list() {
        let provider = InMemoryProvider::new(Vec::new());
        assert!(module_list(&provider).unwrap().is_empty());
    }

    #[test]
    fn test_enumeration_failure_propagates() {
        let provider = InMemoryProvider::broken();
        assert!(matches!(
            module_list(&provider),
            Err(KmodError::Provider { .. })
        ));
    }
}

//! `Info` marshaling.

use super::params::{ParamField, ParameterAggregator};
use crate::models::ModuleInfo;
use crate::provider::{InfoRecord, ModuleHandle, ModuleProvider};
use crate::{KmodError, Result};
use tracing::debug;

/// Accumulates one module's raw records into a [`ModuleInfo`].
///
/// Scalar fields keep the last value seen. Aliases keep every value in
/// encounter order. Parameters go through a [`ParameterAggregator`].
#[derive(Debug, Default)]
pub struct ModuleInfoBuilder {
    description: String,
    author: String,
    license: String,
    version: String,
    srcversion: String,
    vermagic: String,
    depends: String,
    aliases: Vec<String>,
    parameters: ParameterAggregator,
}

impl ModuleInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record in. Unknown keys are ignored.
    pub fn record(&mut self, record: &InfoRecord) -> Result<()> {
        let value = record.value.as_str();
        let scalar = match record.key.as_str() {
            "description" => &mut self.description,
            "author" => &mut self.author,
            "license" => &mut self.license,
            "version" => &mut self.version,
            "srcversion" => &mut self.srcversion,
            "vermagic" => &mut self.vermagic,
            "depends" => &mut self.depends,
            "alias" => {
                self.aliases.push(value.to_string());
                return Ok(());
            }
            key => {
                if let Some(field) = ParamField::from_key(key) {
                    self.parameters.insert(field, value)?;
                }
                return Ok(());
            }
        };
        *scalar = value.to_string();
        Ok(())
    }

    /// Assemble the reply using the handle's canonical name and path.
    pub fn build(self, module: &ModuleHandle) -> ModuleInfo {
        ModuleInfo {
            name: module.name.clone(),
            description: self.description,
            path: module.path.clone().unwrap_or_default(),
            author: self.author,
            license: self.license,
            version: self.version,
            srcversion: self.srcversion,
            vermagic: self.vermagic,
            depends: self.depends,
            aliases: self.aliases,
            parameters: self.parameters.finish(),
        }
    }
}

/// Resolve `name` and marshal its metadata.
///
/// Any resolution failure is reported as [`KmodError::ModuleNotFound`], any
/// failure to fetch records as [`KmodError::NoInfoAvailable`], and a
/// duplicated or malformed parameter record as
/// [`KmodError::MalformedParameter`].
pub fn module_info<P: ModuleProvider + ?Sized>(provider: &P, name: &str) -> Result<ModuleInfo> {
    let module = provider.resolve(name).map_err(|e| {
        debug!("Cannot resolve module {}: {}", name, e);
        KmodError::ModuleNotFound {
            name: name.to_string(),
        }
    })?;

    let records = provider.info_records(&module).map_err(|e| match e {
        KmodError::NoInfoAvailable { .. } => e,
        other => KmodError::NoInfoAvailable {
            name: module.name.clone(),
            reason: other.to_string(),
        },
    })?;

    let mut builder = ModuleInfoBuilder::new();
    for record in &records {
        builder.record(record)?;
    }

    debug!(
        "Marshaled {} records for module {}",
        records.len(),
        module.name
    );
    Ok(builder.build(&module))
}

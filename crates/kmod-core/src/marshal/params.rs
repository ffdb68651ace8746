//! Parameter aggregation.
//!
//! Module objects describe each parameter with up to two records:
//! `parm=<name>:<description>` and `parmtype=<name>:<type>`. They arrive in
//! any order, interleaved with other keys.
//!
//! Output order is newest name first: a parameter first seen after another
//! one is listed before it. Existing clients rely on this order.

use crate::models::Parameter;
use std::collections::HashMap;
use thiserror::Error;

/// Malformed parameter records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("parameter record {value:?} has no ':' separator")]
    MissingSeparator { value: String },

    #[error("parameter {name:?} has more than one {field}")]
    Duplicate { name: String, field: ParamField },
}

/// Which half of a parameter a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamField {
    /// `parm` records.
    Description,
    /// `parmtype` records.
    Type,
}

impl ParamField {
    /// Map a raw info key to a parameter field.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "parm" => Some(ParamField::Description),
            "parmtype" => Some(ParamField::Type),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamField::Description => f.write_str("description"),
            ParamField::Type => f.write_str("type"),
        }
    }
}

/// Deduplicating accumulator of module parameters.
#[derive(Debug, Default)]
pub struct ParameterAggregator {
    /// First-seen order.
    parameters: Vec<Parameter>,
    index: HashMap<String, usize>,
}

impl ParameterAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one `name:rest` value for `field`.
    ///
    /// Setting the same field of the same parameter twice is an error; the
    /// first value is never overwritten.
    pub fn insert(&mut self, field: ParamField, value: &str) -> Result<(), ParameterError> {
        let (name, rest) = value
            .split_once(':')
            .ok_or_else(|| ParameterError::MissingSeparator {
                value: value.to_string(),
            })?;

        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.parameters.push(Parameter::named(name));
                self.index.insert(name.to_string(), self.parameters.len() - 1);
                self.parameters.len() - 1
            }
        };

        let parameter = &mut self.parameters[idx];
        let slot = match field {
            ParamField::Description => &mut parameter.description,
            ParamField::Type => &mut parameter.param_type,
        };
        if slot.is_some() {
            return Err(ParameterError::Duplicate {
                name: name.to_string(),
                field,
            });
        }
        *slot = Some(rest.to_string());
        Ok(())
    }

    /// Number of distinct parameter names seen.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Finish aggregation, newest name first.
    pub fn finish(self) -> Vec<Parameter> {
        let mut parameters = self.parameters;
        parameters.reverse();
        parameters
    }
}

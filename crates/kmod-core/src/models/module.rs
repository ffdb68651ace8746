//! Module metadata types.

use serde::{Deserialize, Serialize};

/// One loaded module, as returned by `List`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub size: i64,
    pub use_count: i64,
    pub used_by: Vec<String>,
}

/// Detailed metadata of one module, as returned by `Info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
    pub path: String,
    pub author: String,
    pub license: String,
    pub version: String,
    pub srcversion: String,
    pub vermagic: String,
    pub depends: String,
    pub aliases: Vec<String>,
    pub parameters: Vec<Parameter>,
}

/// A module parameter assembled from `parm` and `parmtype` records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    /// Create a parameter with no type or description yet.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: None,
            description: None,
        }
    }
}

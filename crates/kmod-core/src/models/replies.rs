//! Reply parameter objects for the two `org.kernel.kmod` methods.

use super::{ModuleInfo, ModuleSummary};
use serde::{Deserialize, Serialize};

/// `List() -> (modules: []Module)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListReply {
    pub modules: Vec<ModuleSummary>,
}

/// `Info(module: string) -> (info: ModuleInfo)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoReply {
    pub info: ModuleInfo,
}

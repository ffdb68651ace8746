//! `org.kernel.kmod` method handlers.

use kmod_core::ipc::{params, Interface, ReplyError, VarlinkDispatch};
use kmod_core::marshal::{module_info, module_list};
use kmod_core::models::{InfoReply, ListReply};
use kmod_core::ModuleProvider;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

pub const INTERFACE: Interface = Interface {
    name: "org.kernel.kmod",
    description: include_str!("org.kernel.kmod.varlink"),
};

/// Answers `List` and `Info` from a module provider.
pub struct KmodDispatch<P> {
    provider: P,
}

impl<P: ModuleProvider> KmodDispatch<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn list(&self, params: &Value) -> Result<Value, ReplyError> {
        params::reject_unknown(params, &[])?;

        let modules = module_list(&self.provider).map_err(|e| {
            error!("Cannot enumerate loaded modules: {}", e);
            e.to_reply_error()
        })?;
        to_value(&ListReply { modules })
    }

    fn info(&self, params: &Value) -> Result<Value, ReplyError> {
        params::reject_unknown(params, &["module"])?;
        let name = params::require_str(params, "module")?;

        let info = module_info(&self.provider, name).map_err(|e| {
            debug!("Info({}) failed: {}", name, e);
            e.to_reply_error()
        })?;
        to_value(&InfoReply { info })
    }
}

impl<P: ModuleProvider> VarlinkDispatch for KmodDispatch<P> {
    fn interface(&self) -> Interface {
        INTERFACE
    }

    fn dispatch(&self, method: &str, params: Value) -> Result<Value, ReplyError> {
        match method {
            "org.kernel.kmod.List" => self.list(&params),
            "org.kernel.kmod.Info" => self.info(&params),
            _ => Err(ReplyError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}

fn to_value<T: Serialize>(reply: &T) -> Result<Value, ReplyError> {
    serde_json::to_value(reply).map_err(|e| {
        error!("Cannot serialize reply: {}", e);
        ReplyError::InternalError
    })
}

//! Marshalers turning provider answers into reply objects.
//!
//! - [`ParameterAggregator`] folds `parm`/`parmtype` records into parameters
//! - [`module_info`] builds the `Info` reply for one module
//! - [`module_list`] builds the `List` reply for all loaded modules

mod info;
mod list;
mod params;

pub use info::{module_info, ModuleInfoBuilder};
pub use list::module_list;
pub use params::{ParamField, ParameterAggregator, ParameterError};

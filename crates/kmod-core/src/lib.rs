//! Kmod Core - kernel module metadata and the varlink service that serves it.
//!
//! The library is split into the pieces a service needs:
//!
//! - [`provider`]: read-only sources of module metadata (the running kernel,
//!   or an in-memory table)
//! - [`marshal`]: turn provider answers into `List` and `Info` reply objects
//! - [`ipc`]: varlink framing, addresses and the connection driver
//!
//! # Example
//!
//! ```rust,ignore
//! use kmod_core::marshal::module_info;
//! use kmod_core::{KernelProvider, ProviderPaths};
//!
//! let provider = KernelProvider::new(ProviderPaths::detect("/")?);
//! let info = module_info(&provider, "loop")?;
//! println!("{} is {}", info.name, info.description);
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod marshal;
pub mod models;
pub mod provider;

pub use config::{ProviderConfig, ProviderPaths, ServiceConfig};
pub use error::{KmodError, Result};
pub use models::{InfoReply, ListReply, ModuleInfo, ModuleSummary, Parameter};
pub use provider::{InfoRecord, KernelProvider, ModuleHandle, ModuleProvider};

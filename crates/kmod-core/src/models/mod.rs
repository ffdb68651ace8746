//! Data models for the `org.kernel.kmod` interface.
//!
//! These types serialize to exactly the shapes declared in the interface
//! description, so they double as the reply wire format.

mod module;
mod replies;

pub use module::*;
pub use replies::*;

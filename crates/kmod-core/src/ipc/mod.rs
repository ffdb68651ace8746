//! Varlink IPC.
//!
//! - **Address**: `unix:`, abstract `unix:@` and `tcp:` service addresses
//! - **Transport**: listening sockets, socket activation and connected streams
//! - **Protocol**: NUL-terminated JSON framing and the call/reply types
//! - **Server**: the service driver and the built-in `org.varlink.service`
//! - **Client**: a minimal blocking-style caller

pub mod address;
pub mod client;
pub mod params;
pub mod protocol;
pub mod server;
pub mod transport;

pub use address::VarlinkAddress;
pub use client::VarlinkClient;
pub use protocol::{ReplyError, VarlinkCall, VarlinkReply};
pub use server::{Interface, VarlinkDispatch, VarlinkService};

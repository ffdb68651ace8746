//! Minimal varlink client.
//!
//! Used by the tests and handy for poking a running service. Calls are sent
//! one at a time and each waits for its reply.

use super::address::VarlinkAddress;
use super::protocol::{read_frame, write_frame, VarlinkCall, VarlinkReply};
use super::transport::{self, Transport};
use crate::{KmodError, Result};
use serde_json::Value;
use tokio::io::{BufReader, ReadHalf, WriteHalf};
use tracing::debug;

/// A connection to a varlink service.
pub struct VarlinkClient {
    reader: BufReader<ReadHalf<Box<dyn Transport>>>,
    writer: WriteHalf<Box<dyn Transport>>,
    pending: Vec<u8>,
}

impl VarlinkClient {
    pub async fn connect(address: &VarlinkAddress) -> Result<Self> {
        let stream = transport::connect(address).await?;
        let (reader, writer) = tokio::io::split(stream);
        debug!("Connected to {}", address);

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            pending: Vec::new(),
        })
    }

    /// Call `method` and wait for its reply.
    ///
    /// Error replies are returned as `Ok`; inspect [`VarlinkReply::error`].
    /// `Err` means the connection itself failed.
    pub async fn call(&mut self, method: &str, parameters: Value) -> Result<VarlinkReply> {
        self.send(&VarlinkCall::new(method, parameters)).await?;

        let frame = read_frame(&mut self.reader, &mut self.pending)
            .await?
            .ok_or_else(|| KmodError::Protocol {
                message: "connection closed before reply".to_string(),
            })?;

        serde_json::from_slice(&frame).map_err(|e| KmodError::Json {
            message: "Failed to parse varlink reply".to_string(),
            source: Some(e),
        })
    }

    /// Send a call that expects no reply.
    pub async fn call_oneway(&mut self, method: &str, parameters: Value) -> Result<()> {
        let mut call = VarlinkCall::new(method, parameters);
        call.oneway = true;
        self.send(&call).await
    }

    async fn send(&mut self, call: &VarlinkCall) -> Result<()> {
        let bytes = serde_json::to_vec(call)?;
        write_frame(&mut self.writer, &bytes).await
    }
}

//! Varlink wire types and framing.
//!
//! Every message is one JSON object followed by a single NUL byte.
//!
//! ```text
//! {"method":"org.kernel.kmod.Info","parameters":{"module":"loop"}}\0
//! {"parameters":{"info":{...}}}\0
//! ```

use crate::config::ServiceConfig;
use crate::{KmodError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Interface name of the introspection methods every service answers.
pub const SERVICE_INTERFACE: &str = "org.varlink.service";

fn is_false(value: &bool) -> bool {
    !*value
}

/// A method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarlinkCall {
    /// Fully qualified method name, `<interface>.<Method>`.
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// The caller expects no reply.
    #[serde(default, skip_serializing_if = "is_false")]
    pub oneway: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub more: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub upgrade: bool,
}

impl VarlinkCall {
    pub fn new(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            method: method.into(),
            parameters: Some(parameters),
            oneway: false,
            more: false,
            upgrade: false,
        }
    }

    /// Split the method into interface and member name.
    pub fn split_method(&self) -> Option<(&str, &str)> {
        self.method
            .rsplit_once('.')
            .filter(|(interface, member)| !interface.is_empty() && !member.is_empty())
    }
}

/// A reply, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarlinkReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Fully qualified error name; absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub continues: bool,
}

impl VarlinkReply {
    pub fn success(parameters: Value) -> Self {
        Self {
            parameters: Some(parameters),
            error: None,
            continues: false,
        }
    }

    pub fn error(error: &ReplyError) -> Self {
        Self {
            parameters: Some(error.parameters()),
            error: Some(error.name().to_string()),
            continues: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Every error a client can receive, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// `org.kernel.kmod.UnknownModule`
    UnknownModule,
    /// `org.kernel.kmod.NoInfoAvailable`
    NoInfoAvailable,
    /// `org.kernel.kmod.InvalidParameter`: a module carries a duplicated or
    /// malformed parameter record.
    MalformedParameter,
    /// `org.kernel.kmod.InternalError`: provider or serialization failure.
    InternalError,
    /// `org.varlink.service.InvalidParameter`: bad call parameters.
    InvalidParameter { parameter: String },
    MethodNotFound { method: String },
    InterfaceNotFound { interface: String },
}

impl ReplyError {
    pub fn invalid_parameter(parameter: impl Into<String>) -> Self {
        ReplyError::InvalidParameter {
            parameter: parameter.into(),
        }
    }

    /// Fully qualified wire name.
    pub fn name(&self) -> &'static str {
        match self {
            ReplyError::UnknownModule => "org.kernel.kmod.UnknownModule",
            ReplyError::NoInfoAvailable => "org.kernel.kmod.NoInfoAvailable",
            ReplyError::MalformedParameter => "org.kernel.kmod.InvalidParameter",
            ReplyError::InternalError => "org.kernel.kmod.InternalError",
            ReplyError::InvalidParameter { .. } => "org.varlink.service.InvalidParameter",
            ReplyError::MethodNotFound { .. } => "org.varlink.service.MethodNotFound",
            ReplyError::InterfaceNotFound { .. } => "org.varlink.service.InterfaceNotFound",
        }
    }

    /// Error parameters object.
    pub fn parameters(&self) -> Value {
        match self {
            ReplyError::InvalidParameter { parameter } => json!({ "parameter": parameter }),
            ReplyError::MethodNotFound { method } => json!({ "method": method }),
            ReplyError::InterfaceNotFound { interface } => json!({ "interface": interface }),
            _ => json!({}),
        }
    }
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.parameters())
    }
}

/// Read one NUL-terminated message.
///
/// `buf` holds bytes of a partially read message and must be kept by the
/// caller between calls, which makes this safe to use inside `select!`.
///
/// Returns `None` on clean EOF (peer closed between messages).
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<Vec<u8>>> {
    let limit = (ServiceConfig::MAX_MESSAGE_SIZE + 1).saturating_sub(buf.len()) as u64;
    let read = (&mut *reader).take(limit).read_until(0, buf).await?;

    if buf.last() == Some(&0) {
        buf.pop();
        return Ok(Some(std::mem::take(buf)));
    }

    if buf.len() > ServiceConfig::MAX_MESSAGE_SIZE {
        return Err(KmodError::MessageTooLarge {
            size: buf.len(),
            max: ServiceConfig::MAX_MESSAGE_SIZE,
        });
    }

    if read == 0 && buf.is_empty() {
        return Ok(None);
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed in the middle of a message",
    )
    .into())
}

/// Write one message followed by its NUL terminator.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(payload).await?;
    writer.write_all(&[0]).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_call_defaults() {
        let call: VarlinkCall =
            serde_json::from_str(r#"{"method":"org.kernel.kmod.List"}"#).unwrap();
        assert_eq!(call.parameters, None);
        assert!(!call.oneway);
        assert_eq!(call.split_method(), Some(("org.kernel.kmod", "List")));
    }

    #[test]
    fn test_split_method_rejects_bare_names() {
        let call = VarlinkCall::new("List", json!({}));
        assert_eq!(call.split_method(), None);
        let call = VarlinkCall::new("org.kernel.kmod.", json!({}));
        assert_eq!(call.split_method(), None);
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = VarlinkReply::error(&ReplyError::UnknownModule);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"error": "org.kernel.kmod.UnknownModule", "parameters": {}})
        );

        let reply = VarlinkReply::error(&ReplyError::invalid_parameter("module"));
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "error": "org.varlink.service.InvalidParameter",
                "parameters": {"parameter": "module"}
            })
        );
    }

    #[test]
    fn test_success_reply_has_no_error() {
        let reply = VarlinkReply::success(json!({"modules": []}));
        let json = serde_json::to_string(&reply).unwrap();
        assert!(!json.contains("error"));
        assert!(!json.contains("continues"));
    }

    #[tokio::test]
    async fn test_frames_in_sequence() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"{\"a\":1}").await.unwrap();
        write_frame(&mut wire, b"{\"b\":2}").await.unwrap();

        let mut reader = Cursor::new(wire);
        let mut buf = Vec::new();
        assert_eq!(
            read_frame(&mut reader, &mut buf).await.unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );
        assert_eq!(
            read_frame(&mut reader, &mut buf).await.unwrap(),
            Some(b"{\"b\":2}".to_vec())
        );
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_disconnect() {
        let mut reader = Cursor::new(b"{\"method\":".to_vec());
        let mut buf = Vec::new();
        let err = read_frame(&mut reader, &mut buf).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let wire = vec![b'x'; ServiceConfig::MAX_MESSAGE_SIZE + 10];
        let mut reader = Cursor::new(wire);
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut buf).await,
            Err(KmodError::MessageTooLarge { .. })
        ));
    }
}

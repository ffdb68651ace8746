//! Varlink service driver.
//!
//! The service owns the listening socket and one task per connection. It does
//! not run its own accept loop: the caller drives it one step at a time with
//! [`VarlinkService::process_events`] so that signal handling and connection
//! handling share a single thread.
//!
//! Requests on one connection are answered strictly in order. Dispatch is
//! synchronous; nothing is awaited between parsing a call and building its
//! reply.

use super::address::VarlinkAddress;
use super::params;
use super::protocol::{
    read_frame, write_frame, ReplyError, VarlinkCall, VarlinkReply, SERVICE_INTERFACE,
};
use super::transport::{Listener, Transport};
use crate::config::ServiceConfig;
use crate::{KmodError, Result};
use serde_json::{json, Value};
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const SERVICE_DESCRIPTION: &str = include_str!("org.varlink.service.varlink");

/// An interface served next to `org.varlink.service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub name: &'static str,
    /// Interface definition in varlink IDL, served verbatim.
    pub description: &'static str,
}

/// Answers calls on one interface.
pub trait VarlinkDispatch: Send + Sync + 'static {
    fn interface(&self) -> Interface;

    /// Handle a call to a method of [`Self::interface`].
    ///
    /// `method` is fully qualified. `params` is the call's parameter object,
    /// or an empty object when the call carried none.
    fn dispatch(&self, method: &str, params: Value) -> std::result::Result<Value, ReplyError>;
}

/// A listening varlink service.
pub struct VarlinkService<D: VarlinkDispatch> {
    listener: Listener,
    dispatch: Arc<D>,
    /// Socket file created by [`Self::bind`], removed on drop.
    socket_file: Option<PathBuf>,
    connections: JoinSet<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl<D: VarlinkDispatch> VarlinkService<D> {
    /// Create the listening socket for `address`.
    pub async fn bind(address: &VarlinkAddress, dispatch: Arc<D>) -> Result<Self> {
        let (listener, socket_file) = Listener::bind(address).await?;
        Ok(Self::with_listener(listener, socket_file, dispatch))
    }

    /// Serve on a socket inherited from a service manager.
    pub fn from_listener_fd(
        address: &VarlinkAddress,
        fd: OwnedFd,
        dispatch: Arc<D>,
    ) -> Result<Self> {
        let listener = Listener::from_activated(address, fd)?;
        Ok(Self::with_listener(listener, None, dispatch))
    }

    fn with_listener(listener: Listener, socket_file: Option<PathBuf>, dispatch: Arc<D>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            listener,
            dispatch,
            socket_file,
            connections: JoinSet::new(),
            shutdown_tx,
        }
    }

    /// Number of connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Wait for and accept one connection, and reap finished connections.
    ///
    /// Transient accept failures are logged and swallowed. Any other error
    /// is returned to the caller.
    pub async fn process_events(&mut self) -> Result<()> {
        self.reap();

        let stream = match self.listener.accept().await {
            Ok(stream) => stream,
            Err(e) if is_transient_accept_error(&e) => {
                debug!("Transient accept failure: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.reap();
        if self.connections.len() >= ServiceConfig::MAX_CONNECTIONS {
            warn!(
                "Rejecting connection: at max capacity ({})",
                ServiceConfig::MAX_CONNECTIONS
            );
            return Ok(());
        }

        let dispatch = self.dispatch.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.connections.spawn(async move {
            if let Err(e) = handle_connection(stream, &*dispatch, shutdown_rx).await {
                if e.is_disconnect() {
                    debug!("Connection dropped: {}", e);
                } else {
                    warn!("Closing connection: {}", e);
                }
            }
        });
        debug!("Accepted connection ({} active)", self.connections.len());
        Ok(())
    }

    fn reap(&mut self) {
        while let Some(result) = self.connections.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Connection handler panicked: {}", e);
                }
            }
        }
    }

    /// Stop serving.
    ///
    /// Connections stop reading new requests; replies already being written
    /// get until the grace period ends to finish.
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);

        let active = self.connections.len();
        if active > 0 {
            info!("Waiting for {} connection(s) to finish", active);
        }

        let drained = tokio::time::timeout(ServiceConfig::SHUTDOWN_GRACE, async {
            while self.connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Aborting {} connection(s) after {:?}",
                self.connections.len(),
                ServiceConfig::SHUTDOWN_GRACE
            );
            self.connections.abort_all();
        }
        info!("Service stopped");
    }
}

impl<D: VarlinkDispatch> Drop for VarlinkService<D> {
    fn drop(&mut self) {
        self.connections.abort_all();
        if let Some(path) = self.socket_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove socket {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

async fn handle_connection<D: VarlinkDispatch>(
    stream: Box<dyn Transport>,
    dispatch: &D,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    loop {
        if *shutdown_rx.borrow_and_update() {
            return Ok(());
        }

        let frame = tokio::select! {
            result = read_frame(&mut reader, &mut pending) => {
                match result? {
                    Some(frame) => frame,
                    None => return Ok(()),
                }
            }
            _ = shutdown_rx.changed() => return Ok(()),
        };

        if let Some(reply) = process_message(&frame, dispatch)? {
            let bytes = serde_json::to_vec(&reply)?;
            write_frame(&mut writer, &bytes).await?;
        }
    }
}

/// Turn one raw message into its reply. `None` means no reply is sent.
///
/// A message that is not a call is a protocol error and ends the connection.
fn process_message<D: VarlinkDispatch>(
    frame: &[u8],
    dispatch: &D,
) -> Result<Option<VarlinkReply>> {
    let call: VarlinkCall = serde_json::from_slice(frame).map_err(|e| KmodError::Protocol {
        message: format!("invalid call: {}", e),
    })?;
    debug!("Call {}", call.method);

    let reply = match route(&call, dispatch) {
        Ok(parameters) => VarlinkReply::success(parameters),
        Err(e) => {
            debug!("Call {} failed: {}", call.method, e);
            VarlinkReply::error(&e)
        }
    };

    Ok((!call.oneway).then_some(reply))
}

fn route<D: VarlinkDispatch>(
    call: &VarlinkCall,
    dispatch: &D,
) -> std::result::Result<Value, ReplyError> {
    let Some((interface, _)) = call.split_method() else {
        return Err(ReplyError::InterfaceNotFound {
            interface: call.method.clone(),
        });
    };

    let params = call.parameters.clone().unwrap_or_else(|| json!({}));
    params::as_object(&params)?;

    if interface == SERVICE_INTERFACE {
        service_method(&call.method, &params, dispatch)
    } else if interface == dispatch.interface().name {
        dispatch.dispatch(&call.method, params)
    } else {
        Err(ReplyError::InterfaceNotFound {
            interface: interface.to_string(),
        })
    }
}

/// `org.varlink.service` methods.
fn service_method<D: VarlinkDispatch>(
    method: &str,
    params: &Value,
    dispatch: &D,
) -> std::result::Result<Value, ReplyError> {
    let served = dispatch.interface();

    match method {
        "org.varlink.service.GetInfo" => {
            params::reject_unknown(params, &[])?;
            Ok(json!({
                "vendor": ServiceConfig::VENDOR,
                "product": ServiceConfig::PRODUCT,
                "version": ServiceConfig::VERSION,
                "url": ServiceConfig::URL,
                "interfaces": [SERVICE_INTERFACE, served.name],
            }))
        }
        "org.varlink.service.GetInterfaceDescription" => {
            params::reject_unknown(params, &["interface"])?;
            let interface = params::require_str(params, "interface")?;
            let description = match interface {
                SERVICE_INTERFACE => SERVICE_DESCRIPTION,
                name if name == served.name => served.description,
                name => {
                    return Err(ReplyError::InterfaceNotFound {
                        interface: name.to_string(),
                    })
                }
            };
            Ok(json!({ "description": description }))
        }
        _ => Err(ReplyError::MethodNotFound {
            method: method.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::client::VarlinkClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;
    use tokio::sync::Notify;

    /// Large enough to fill the socket buffer, so the write stays pending
    /// until the peer reads.
    const BULK_SIZE: usize = 1 << 20;

    const ECHO_INTERFACE: Interface = Interface {
        name: "org.example.echo",
        description: "interface org.example.echo\n\nmethod Echo(word: string) -> (word: string)\n",
    };

    #[derive(Default)]
    struct EchoDispatch {
        calls: AtomicUsize,
        bulk_built: Notify,
    }

    impl VarlinkDispatch for EchoDispatch {
        fn interface(&self) -> Interface {
            ECHO_INTERFACE
        }

        fn dispatch(&self, method: &str, params: Value) -> std::result::Result<Value, ReplyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match method {
                "org.example.echo.Echo" => {
                    params::reject_unknown(&params, &["word"])?;
                    let word = params::require_str(&params, "word")?;
                    Ok(json!({ "word": word }))
                }
                "org.example.echo.Bulk" => {
                    self.bulk_built.notify_one();
                    Ok(json!({ "word": "x".repeat(BULK_SIZE) }))
                }
                _ => Err(ReplyError::MethodNotFound {
                    method: method.to_string(),
                }),
            }
        }
    }

    async fn start(temp_dir: &TempDir) -> (VarlinkAddress, Arc<EchoDispatch>) {
        let address = VarlinkAddress::Unix {
            path: temp_dir.path().join("echo.sock"),
            mode: None,
        };
        let dispatch = Arc::new(EchoDispatch::default());
        let mut service = VarlinkService::bind(&address, dispatch.clone())
            .await
            .unwrap();
        tokio::spawn(async move {
            loop {
                if service.process_events().await.is_err() {
                    break;
                }
            }
        });
        (address, dispatch)
    }

    #[test]
    fn test_route_unknown_interface_and_method() {
        let dispatch = EchoDispatch::default();

        let call = VarlinkCall::new("org.example.other.Echo", json!({}));
        assert_eq!(
            route(&call, &dispatch),
            Err(ReplyError::InterfaceNotFound {
                interface: "org.example.other".into()
            })
        );

        let call = VarlinkCall::new("org.varlink.service.Frobnicate", json!({}));
        assert_eq!(
            route(&call, &dispatch),
            Err(ReplyError::MethodNotFound {
                method: "org.varlink.service.Frobnicate".into()
            })
        );
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_route_rejects_non_object_parameters() {
        let dispatch = EchoDispatch::default();
        let call = VarlinkCall::new("org.example.echo.Echo", json!(["word"]));
        assert_eq!(
            route(&call, &dispatch),
            Err(ReplyError::invalid_parameter("parameters"))
        );
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_info_lists_interfaces() {
        let dispatch = EchoDispatch::default();
        let call = VarlinkCall::new("org.varlink.service.GetInfo", json!({}));
        let info = route(&call, &dispatch).unwrap();
        assert_eq!(
            info["interfaces"],
            json!(["org.varlink.service", "org.example.echo"])
        );
        assert_eq!(info["vendor"], ServiceConfig::VENDOR);
    }

    #[test]
    fn test_get_interface_description() {
        let dispatch = EchoDispatch::default();

        let call = VarlinkCall::new(
            "org.varlink.service.GetInterfaceDescription",
            json!({"interface": "org.example.echo"}),
        );
        assert_eq!(
            route(&call, &dispatch).unwrap(),
            json!({"description": ECHO_INTERFACE.description})
        );

        let call = VarlinkCall::new(
            "org.varlink.service.GetInterfaceDescription",
            json!({"interface": "org.varlink.service"}),
        );
        let description = route(&call, &dispatch).unwrap();
        assert!(description["description"]
            .as_str()
            .unwrap()
            .contains("interface org.varlink.service"));

        let call = VarlinkCall::new(
            "org.varlink.service.GetInterfaceDescription",
            json!({"interface": "org.example.none"}),
        );
        assert_eq!(
            route(&call, &dispatch),
            Err(ReplyError::InterfaceNotFound {
                interface: "org.example.none".into()
            })
        );
    }

    #[test]
    fn test_oneway_gets_no_reply() {
        let dispatch = EchoDispatch::default();
        let frame = br#"{"method":"org.example.echo.Echo","parameters":{"word":"hi"},"oneway":true}"#;
        assert_eq!(process_message(frame, &dispatch).unwrap(), None);
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let dispatch = EchoDispatch::default();
        assert!(matches!(
            process_message(b"not json", &dispatch),
            Err(KmodError::Protocol { .. })
        ));
        assert!(matches!(
            process_message(b"{\"parameters\":{}}", &dispatch),
            Err(KmodError::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_calls_answered_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let (address, _dispatch) = start(&temp_dir).await;

        let mut client = VarlinkClient::connect(&address).await.unwrap();
        for word in ["one", "two", "three"] {
            let reply = client
                .call("org.example.echo.Echo", json!({ "word": word }))
                .await
                .unwrap();
            assert_eq!(reply.parameters, Some(json!({ "word": word })));
        }

        let reply = client
            .call("org.example.echo.Echo", json!({ "word": "" }))
            .await
            .unwrap();
        assert_eq!(
            reply.error.as_deref(),
            Some("org.varlink.service.InvalidParameter")
        );
        assert_eq!(reply.parameters, Some(json!({ "parameter": "word" })));
    }

    #[tokio::test]
    async fn test_protocol_error_closes_only_that_connection() {
        let temp_dir = TempDir::new().unwrap();
        let (address, _dispatch) = start(&temp_dir).await;
        let VarlinkAddress::Unix { path, .. } = &address else {
            unreachable!()
        };

        let mut healthy = VarlinkClient::connect(&address).await.unwrap();

        let mut broken = UnixStream::connect(path).await.unwrap();
        broken.write_all(b"garbage\0").await.unwrap();
        let mut rest = Vec::new();
        let read = tokio::io::AsyncReadExt::read_to_end(&mut broken, &mut rest)
            .await
            .unwrap();
        assert_eq!(read, 0);

        let reply = healthy
            .call("org.example.echo.Echo", json!({ "word": "still here" }))
            .await
            .unwrap();
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections_and_removes_socket() {
        let temp_dir = TempDir::new().unwrap();
        let address = VarlinkAddress::Unix {
            path: temp_dir.path().join("echo.sock"),
            mode: None,
        };
        let VarlinkAddress::Unix { path, .. } = &address else {
            unreachable!()
        };
        let mut service = VarlinkService::bind(&address, Arc::new(EchoDispatch::default()))
            .await
            .unwrap();

        let connect = tokio::spawn({
            let address = address.clone();
            async move { VarlinkClient::connect(&address).await }
        });
        service.process_events().await.unwrap();
        let mut client = connect.await.unwrap().unwrap();
        assert_eq!(service.connection_count(), 1);

        tokio::time::timeout(ServiceConfig::SHUTDOWN_GRACE, service.shutdown())
            .await
            .unwrap();
        assert!(!path.exists());

        let result = client
            .call("org.example.echo.Echo", json!({ "word": "late" }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pipelined_calls_answered_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let (address, _dispatch) = start(&temp_dir).await;
        let VarlinkAddress::Unix { path, .. } = &address else {
            unreachable!()
        };

        let mut wire = Vec::new();
        for n in 0..5 {
            let call = VarlinkCall::new("org.example.echo.Echo", json!({ "word": n.to_string() }));
            wire.extend(serde_json::to_vec(&call).unwrap());
            wire.push(0);
        }

        let stream = UnixStream::connect(path).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        writer.write_all(&wire).await.unwrap();

        let mut reader = BufReader::new(reader);
        let mut pending = Vec::new();
        for n in 0..5 {
            let frame = read_frame(&mut reader, &mut pending).await.unwrap().unwrap();
            let reply: VarlinkReply = serde_json::from_slice(&frame).unwrap();
            assert_eq!(reply.parameters, Some(json!({ "word": n.to_string() })));
        }
    }

    #[tokio::test]
    async fn test_oneway_call_is_executed_without_reply() {
        let temp_dir = TempDir::new().unwrap();
        let (address, dispatch) = start(&temp_dir).await;

        let mut client = VarlinkClient::connect(&address).await.unwrap();
        client
            .call_oneway("org.example.echo.Echo", json!({ "word": "quiet" }))
            .await
            .unwrap();
        let reply = client
            .call("org.example.echo.Echo", json!({ "word": "loud" }))
            .await
            .unwrap();

        assert_eq!(reply.parameters, Some(json!({ "word": "loud" })));
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_finishes_reply_in_flight_and_accepts_no_more_calls() {
        let temp_dir = TempDir::new().unwrap();
        let address = VarlinkAddress::Unix {
            path: temp_dir.path().join("echo.sock"),
            mode: None,
        };
        let VarlinkAddress::Unix { path, .. } = &address else {
            unreachable!()
        };
        let dispatch = Arc::new(EchoDispatch::default());
        let mut service = VarlinkService::bind(&address, dispatch.clone())
            .await
            .unwrap();

        let connect = tokio::spawn(UnixStream::connect(path.clone()));
        service.process_events().await.unwrap();
        let stream = connect.await.unwrap().unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let call = serde_json::to_vec(&VarlinkCall::new("org.example.echo.Bulk", json!({}))).unwrap();
        write_frame(&mut writer, &call).await.unwrap();

        // The handler runs until its write blocks on the full socket buffer.
        dispatch.bulk_built.notified().await;

        let client = async {
            let mut pending = Vec::new();
            let frame = read_frame(&mut reader, &mut pending).await.unwrap().unwrap();
            let reply: VarlinkReply = serde_json::from_slice(&frame).unwrap();
            let received = reply.parameters.unwrap()["word"].as_str().unwrap().len();

            let late = serde_json::to_vec(&VarlinkCall::new(
                "org.example.echo.Echo",
                json!({ "word": "late" }),
            ))
            .unwrap();
            let _ = write_frame(&mut writer, &late).await;
            let after = read_frame(&mut reader, &mut pending).await;
            (received, after)
        };

        let (_, (received, after)) = tokio::time::timeout(
            ServiceConfig::SHUTDOWN_GRACE,
            async { tokio::join!(service.shutdown(), client) },
        )
        .await
        .unwrap();

        assert_eq!(received, BULK_SIZE);
        assert!(matches!(after, Ok(None) | Err(_)));
        assert_eq!(dispatch.calls.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
    }
}

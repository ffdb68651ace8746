//! Listening sockets and connected streams for every address kind.

use super::address::VarlinkAddress;
use crate::{KmodError, Result};
use std::os::fd::OwnedFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, info};

/// A connected byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Transport for T {}

/// A listening socket.
#[derive(Debug)]
pub enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    /// Bind a new listening socket at `address`.
    ///
    /// A stale socket file at a Unix path is replaced. Returns the listener
    /// and the socket file to remove on shutdown, if any.
    pub async fn bind(address: &VarlinkAddress) -> Result<(Self, Option<PathBuf>)> {
        match address {
            VarlinkAddress::Unix { path, mode } => {
                remove_stale_socket(path)?;
                let listener =
                    UnixListener::bind(path).map_err(|e| KmodError::io_with_path(e, path))?;
                if let Some(mode) = mode {
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(*mode))
                        .map_err(|e| KmodError::io_with_path(e, path))?;
                }
                info!("Listening on {}", address);
                Ok((Listener::Unix(listener), Some(path.clone())))
            }
            VarlinkAddress::Abstract { name } => {
                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
                let std_listener = std::os::unix::net::UnixListener::bind_addr(&addr)?;
                std_listener.set_nonblocking(true)?;
                info!("Listening on {}", address);
                Ok((Listener::Unix(UnixListener::from_std(std_listener)?), None))
            }
            VarlinkAddress::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                info!("Listening on {}", listener.local_addr()?);
                Ok((Listener::Tcp(listener), None))
            }
        }
    }

    /// Adopt an already listening socket handed down by an activator.
    ///
    /// The address only decides whether the descriptor is treated as a Unix
    /// or a TCP socket. The socket file of an adopted listener belongs to the
    /// activator and is never removed.
    pub fn from_activated(address: &VarlinkAddress, fd: OwnedFd) -> Result<Self> {
        let listener = match address {
            VarlinkAddress::Unix { .. } | VarlinkAddress::Abstract { .. } => {
                let std_listener = std::os::unix::net::UnixListener::from(fd);
                std_listener.set_nonblocking(true)?;
                Listener::Unix(UnixListener::from_std(std_listener)?)
            }
            VarlinkAddress::Tcp { .. } => {
                let std_listener = std::net::TcpListener::from(fd);
                std_listener.set_nonblocking(true)?;
                Listener::Tcp(TcpListener::from_std(std_listener)?)
            }
        };
        info!("Using activated socket for {}", address);
        Ok(listener)
    }

    /// Accept one connection.
    pub async fn accept(&self) -> std::io::Result<Box<dyn Transport>> {
        match self {
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!("Connection from {}", peer);
                Ok(Box::new(stream))
            }
        }
    }
}

/// Connect to a service at `address`.
pub async fn connect(address: &VarlinkAddress) -> Result<Box<dyn Transport>> {
    match address {
        VarlinkAddress::Unix { path, .. } => {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| KmodError::io_with_path(e, path))?;
            Ok(Box::new(stream))
        }
        VarlinkAddress::Abstract { name } => {
            let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
            let std_stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
            std_stream.set_nonblocking(true)?;
            Ok(Box::new(UnixStream::from_std(std_stream)?))
        }
        VarlinkAddress::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            Ok(Box::new(stream))
        }
    }
}

/// Remove a leftover socket file; refuse to clobber anything else.
fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path).map_err(|e| KmodError::io_with_path(e, path))
        }
        Ok(_) => Err(KmodError::Address {
            address: path.display().to_string(),
            message: "path exists and is not a socket".to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KmodError::io_with_path(e, path)),
    }
}

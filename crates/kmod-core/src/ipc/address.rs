//! Varlink service addresses.
//!
//! ```text
//! unix:/run/org.kernel.kmod;mode=0666
//! unix:@org.kernel.kmod
//! tcp:127.0.0.1:12345
//! ```

use crate::{KmodError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a varlink service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarlinkAddress {
    /// Unix socket bound to a filesystem path, with optional permissions.
    Unix { path: PathBuf, mode: Option<u32> },
    /// Linux abstract Unix socket.
    Abstract { name: String },
    Tcp { host: String, port: u16 },
}

impl VarlinkAddress {
    fn invalid(address: &str, message: impl Into<String>) -> KmodError {
        KmodError::Address {
            address: address.to_string(),
            message: message.into(),
        }
    }
}

impl FromStr for VarlinkAddress {
    type Err = KmodError;

    fn from_str(address: &str) -> Result<Self> {
        let (location, params) = match address.split_once(';') {
            Some((location, params)) => (location, Some(params)),
            None => (address, None),
        };

        if let Some(rest) = location.strip_prefix("unix:") {
            if let Some(name) = rest.strip_prefix('@') {
                if name.is_empty() {
                    return Err(Self::invalid(address, "empty abstract socket name"));
                }
                if params.is_some() {
                    return Err(Self::invalid(address, "abstract sockets take no parameters"));
                }
                return Ok(VarlinkAddress::Abstract {
                    name: name.to_string(),
                });
            }

            if !rest.starts_with('/') {
                return Err(Self::invalid(address, "socket path must be absolute"));
            }

            let mut mode = None;
            for param in params.into_iter().flat_map(|p| p.split(';')) {
                match param.split_once('=') {
                    Some(("mode", value)) => {
                        let parsed = u32::from_str_radix(value, 8)
                            .ok()
                            .filter(|m| *m <= 0o7777)
                            .ok_or_else(|| {
                                Self::invalid(address, format!("invalid mode {:?}", value))
                            })?;
                        mode = Some(parsed);
                    }
                    _ => {
                        return Err(Self::invalid(
                            address,
                            format!("unknown parameter {:?}", param),
                        ))
                    }
                }
            }

            return Ok(VarlinkAddress::Unix {
                path: PathBuf::from(rest),
                mode,
            });
        }

        if let Some(rest) = location.strip_prefix("tcp:") {
            if params.is_some() {
                return Err(Self::invalid(address, "tcp addresses take no parameters"));
            }
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| Self::invalid(address, "expected tcp:<host>:<port>"))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(Self::invalid(address, "empty host"));
            }
            let port = port
                .parse()
                .map_err(|_| Self::invalid(address, format!("invalid port {:?}", port)))?;
            return Ok(VarlinkAddress::Tcp {
                host: host.to_string(),
                port,
            });
        }

        Err(Self::invalid(address, "unsupported address scheme"))
    }
}

impl fmt::Display for VarlinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarlinkAddress::Unix { path, mode } => {
                write!(f, "unix:{}", path.display())?;
                if let Some(mode) = mode {
                    write!(f, ";mode={:04o}", mode)?;
                }
                Ok(())
            }
            VarlinkAddress::Abstract { name } => write!(f, "unix:@{}", name),
            VarlinkAddress::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp:[{}]:{}", host, port)
            }
            VarlinkAddress::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
        }
    }
}

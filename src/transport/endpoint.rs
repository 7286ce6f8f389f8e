//! Endpoint addressing in `scheme://address` form.

use std::{fmt, path::PathBuf, str::FromStr};

/// A remote address a connection can be opened against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp { host: String, port: u16 },
    /// `ipc:///path/to/socket`, a Unix domain socket.
    Ipc { path: PathBuf },
}

impl Endpoint {
    /// Convenience constructor for TCP endpoints.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Ipc { path } => write!(f, "ipc://{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some((scheme, address)) = trimmed.split_once("://") else {
            return Err(format!("endpoint '{trimmed}' must use scheme://address form"));
        };
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => parse_tcp(trimmed, address),
            "ipc" => {
                if address.is_empty() {
                    return Err(format!("endpoint '{trimmed}' has an empty ipc path"));
                }
                Ok(Endpoint::Ipc {
                    path: PathBuf::from(address),
                })
            }
            other => Err(format!(
                "endpoint '{trimmed}' uses unsupported scheme '{other}'. Valid schemes are: tcp, ipc"
            )),
        }
    }
}

fn parse_tcp(raw: &str, address: &str) -> Result<Endpoint, String> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(format!("endpoint '{raw}' is missing a port"));
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("endpoint '{raw}' has an empty host"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("endpoint '{raw}' has an invalid port '{port}'"))?;
    Ok(Endpoint::tcp(host, port))
}

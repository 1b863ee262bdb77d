use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub mod protocol;
pub mod server;

/// A peer endpoint as it travels on the wire: `host:port`.
///
/// Hosts stay as strings because the protocols exchange endpoints in text
/// form and a peer may announce itself under a hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid peer address: {0}")]
pub struct ParseAddrError(String);

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseAddrError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseAddrError(s.to_string()));
        }
        let port = port.parse().map_err(|_| ParseAddrError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

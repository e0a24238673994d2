//! Remote SHARP peers

use crate::network::message::PROTOCOL_VERSION;
use std::fmt;

/// A remote host resolved for one delivery attempt; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Mail domain the peer serves
    pub domain: String,
    /// Host or IP to dial
    pub host: String,
    pub port: u16,
    /// Protocol the peer advertised
    pub protocol_version: String,
}

impl Peer {
    /// Peer named by an explicit `domain:port`, bypassing discovery
    pub fn direct(domain: &str, port: u16) -> Self {
        Self {
            domain: domain.to_string(),
            host: domain.to_string(),
            port,
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// `host:port` to dial
    pub fn dial_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.domain, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_peer() {
        let peer = Peer::direct("localhost", 5000);
        assert_eq!(peer.dial_addr(), "localhost:5000");
        assert_eq!(peer.protocol_version, PROTOCOL_VERSION);
        assert_eq!(peer.to_string(), "localhost (localhost:5000)");
    }
}

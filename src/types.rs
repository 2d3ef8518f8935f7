//! Core types shared across the engine
//!
//! Identifiers for downloads and work units, the peer identity produced
//! when a connection is accepted, and the content-derived fingerprint that
//! names derived downloads.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    /// Create a new random download ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short aria2-style GID (first 8 bytes of the UUID, hex encoded).
    ///
    /// This is a lossy projection meant for log lines only.
    pub fn to_gid(&self) -> String {
        hex::encode(&self.0.as_bytes()[0..8])
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_gid())
    }
}

/// Correlation id of a work unit.
///
/// Issued by the engine in strictly increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cuid(pub(crate) u64);

impl Cuid {
    /// Raw numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CUID#{}", self.0)
    }
}

/// Content-derived identity of a download (BitTorrent info hash)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 20]);

impl Fingerprint {
    /// Raw 20-byte digest
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase 40-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl From<[u8; 20]> for Fingerprint {
    fn from(hash: [u8; 20]) -> Self {
        Self(hash)
    }
}

/// Remote side of a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Remote address and port
    pub addr: SocketAddr,
    /// Whether the remote side initiated the connection
    pub incoming: bool,
}

impl Peer {
    /// Peer that connected to our listening port
    pub fn incoming(addr: SocketAddr) -> Self {
        Self {
            addr,
            incoming: true,
        }
    }

    /// Remote IP address in string form
    pub fn ip(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuid_display() {
        assert_eq!(Cuid(7).to_string(), "CUID#7");
    }

    #[test]
    fn test_fingerprint_hex() {
        let mut raw = [0u8; 20];
        raw[0] = 0xab;
        raw[19] = 0x01;
        let fp = Fingerprint::from(raw);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
    }

    #[test]
    fn test_incoming_peer() {
        let peer = Peer::incoming("192.168.1.20:51413".parse().unwrap());
        assert!(peer.incoming);
        assert_eq!(peer.ip(), "192.168.1.20");
        assert_eq!(peer.port(), 51413);
    }

    #[test]
    fn test_gid_is_16_hex_chars() {
        let id = DownloadId::new();
        assert_eq!(id.to_gid().len(), 16);
        assert_eq!(id.to_string(), id.to_gid());
    }
}

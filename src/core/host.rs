//! Host addressing.
//!
//! A host is an `(ip, port)` pair. Every storage host exposes a client-facing
//! service port and a replication port at `service_port + 1`, so only the
//! service address is ever registered with placement metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Encoded size of a [`HostAddr`] on the replication log.
pub const HOST_ADDR_WIRE_LEN: usize = 6;

/// Address of a storage host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl HostAddr {
    /// The unset address. Never treated as real placement.
    pub const UNSET: HostAddr = HostAddr {
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Loopback address on the given port, mostly for tests and local clusters.
    pub fn localhost(port: u16) -> Self {
        Self::new(Ipv4Addr::LOCALHOST, port)
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }

    /// Replication address derived from a service address.
    pub fn raft_addr(&self) -> HostAddr {
        if self.is_unset() {
            return *self;
        }
        HostAddr::new(self.ip, self.port.wrapping_add(1))
    }

    /// Service address derived from a replication address.
    pub fn store_addr(&self) -> HostAddr {
        if self.is_unset() {
            return *self;
        }
        HostAddr::new(self.ip, self.port.wrapping_sub(1))
    }

    /// Fixed-size big-endian encoding used inside log entries.
    pub fn to_bytes(&self) -> [u8; HOST_ADDR_WIRE_LEN] {
        let mut out = [0u8; HOST_ADDR_WIRE_LEN];
        out[..4].copy_from_slice(&self.ip.octets());
        out[4..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Decode from the fixed-size encoding. Returns `None` unless `bytes`
    /// is exactly [`HOST_ADDR_WIRE_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HOST_ADDR_WIRE_LEN {
            return None;
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Some(Self::new(ip, port))
    }
}

impl Default for HostAddr {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Error returned when parsing a host address fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid host address: {0}")]
pub struct ParseHostAddrError(String);

impl FromStr for HostAddr {
    type Err = ParseHostAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseHostAddrError(s.to_string()))?;
        let ip = ip
            .parse::<Ipv4Addr>()
            .map_err(|_| ParseHostAddrError(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseHostAddrError(s.to_string()))?;
        Ok(Self::new(ip, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raft_and_store_addr_offsets() {
        let svc = HostAddr::localhost(44500);
        assert_eq!(svc.raft_addr(), HostAddr::localhost(44501));
        assert_eq!(svc.raft_addr().store_addr(), svc);
    }

    #[test]
    fn test_unset_is_never_shifted() {
        assert_eq!(HostAddr::UNSET.raft_addr(), HostAddr::UNSET);
        assert_eq!(HostAddr::UNSET.store_addr(), HostAddr::UNSET);
        assert!(HostAddr::default().is_unset());
    }

    #[test]
    fn test_wire_encoding() {
        let addr: HostAddr = "10.1.2.3:9780".parse().unwrap();
        let bytes = addr.to_bytes();
        assert_eq!(bytes, [10, 1, 2, 3, 0x26, 0x34]);
        assert_eq!(HostAddr::from_bytes(&bytes), Some(addr));
        assert_eq!(HostAddr::from_bytes(&bytes[..5]), None);
        let mut padded = bytes.to_vec();
        padded.push(0);
        assert_eq!(HostAddr::from_bytes(&padded), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("localhost".parse::<HostAddr>().is_err());
        assert!("1.2.3.4:notaport".parse::<HostAddr>().is_err());
        assert_eq!(
            "127.0.0.1:80".parse::<HostAddr>().unwrap().to_string(),
            "127.0.0.1:80"
        );
    }
}

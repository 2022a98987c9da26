//! Tunnel endpoint configuration.

use crate::error::{TunnelError, TunnelResult};
use crate::header::{HEADER_LEN, MAX_FRAME};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Default UDP port used by both ends of the tunnel.
pub const DEFAULT_TUNNEL_PORT: u16 = 5005;

/// Default maximum fragment payload carried in one datagram.
pub const DEFAULT_TUNNEL_MTU: u16 = 1200;

/// Default outbound queue depth (frames).
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Default reassembly staleness timeout in milliseconds.
pub const DEFAULT_REASSEMBLY_TIMEOUT_MS: u64 = 50;

/// Receive buffer size; larger than any valid datagram so oversize ones are
/// seen (and rejected) rather than truncated into something plausible.
pub const RECV_BUFFER_SIZE: usize = 2048;

const _: () = assert!(RECV_BUFFER_SIZE > HEADER_LEN + MAX_FRAME);

/// Configuration for one tunnel endpoint.
///
/// Both peers must use the same `mtu`: the receiver derives fragment
/// positions and counts from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Local address the UDP socket binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Fixed peer address all fragments are sent to.
    pub peer_addr: SocketAddr,

    /// Maximum fragment payload size in bytes.
    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// Outbound queue capacity in frames.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Time a partial frame may sit without new fragments before eviction.
    #[serde(default = "default_reassembly_timeout_ms")]
    pub reassembly_timeout_ms: u64,
}

impl TunnelConfig {
    /// Create a configuration with default tuning for the given peer.
    pub fn new(bind_addr: SocketAddr, peer_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            peer_addr,
            mtu: DEFAULT_TUNNEL_MTU,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            reassembly_timeout_ms: DEFAULT_REASSEMBLY_TIMEOUT_MS,
        }
    }

    /// Set the MTU.
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the outbound queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the reassembly timeout.
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> TunnelResult<()> {
        if self.mtu == 0 || usize::from(self.mtu) > MAX_FRAME {
            return Err(TunnelError::Config(format!(
                "MTU {} out of range. Valid range: 1-{}",
                self.mtu, MAX_FRAME
            )));
        }
        if self.queue_depth == 0 {
            return Err(TunnelError::Config(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.reassembly_timeout_ms == 0 {
            return Err(TunnelError::Config(
                "reassembly_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.peer_addr.port() == 0 || self.peer_addr.ip().is_unspecified() {
            return Err(TunnelError::Config(format!(
                "Invalid peer address {}",
                self.peer_addr
            )));
        }
        Ok(())
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_TUNNEL_PORT))
}

fn default_mtu() -> u16 {
    DEFAULT_TUNNEL_MTU
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_reassembly_timeout_ms() -> u64 {
    DEFAULT_REASSEMBLY_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.168.50.2:5005".parse().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = TunnelConfig::new(default_bind_addr(), peer());
        assert_eq!(config.mtu, 1200);
        assert_eq!(config.queue_depth, 16);
        assert_eq!(config.reassembly_timeout(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ranges() {
        let base = TunnelConfig::new(default_bind_addr(), peer());
        assert!(base.clone().with_mtu(0).validate().is_err());
        assert!(base.clone().with_mtu(1601).validate().is_err());
        assert!(base.clone().with_mtu(1600).validate().is_ok());
        assert!(base.clone().with_queue_depth(0).validate().is_err());
        assert!(base
            .clone()
            .with_reassembly_timeout(Duration::ZERO)
            .validate()
            .is_err());

        let unspecified = TunnelConfig::new(default_bind_addr(), "0.0.0.0:5005".parse().unwrap());
        assert!(unspecified.validate().is_err());
        let no_port = TunnelConfig::new(default_bind_addr(), "192.168.50.2:0".parse().unwrap());
        assert!(no_port.validate().is_err());
    }
}

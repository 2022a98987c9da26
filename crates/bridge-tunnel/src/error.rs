//! Error types for the tunnel.

use std::net::SocketAddr;
use thiserror::Error;

/// Tunnel errors.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Invalid tunnel configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// UDP socket creation or bind failed at startup.
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Network I/O error.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Frame is empty or larger than the tunnel accepts.
    #[error("Frame length {len} out of range (1..={max})")]
    FrameLength { len: usize, max: usize },

    /// Outbound queue is full; the frame was dropped.
    #[error("Outbound queue full")]
    QueueFull,

    /// The endpoint's loops have stopped.
    #[error("Tunnel endpoint closed")]
    Closed,
}

impl TunnelError {
    /// Returns true if this error only affects a single frame.
    ///
    /// Per-frame failures are absorbed into the drop counter by the caller;
    /// everything else means the endpoint cannot run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TunnelError::FrameLength { .. } | TunnelError::QueueFull)
    }
}

/// Result type alias for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

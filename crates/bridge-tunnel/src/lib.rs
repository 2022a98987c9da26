//! Ethernet-over-UDP tunnel for wire-bridge.
//!
//! Ethernet frames are split into MTU-sized fragments, each sent as one UDP
//! datagram with a 12-byte header, and reassembled by the peer:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         bridge-tunnel                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │  submit ──► queue ──► Fragmenter ──► UDP ──► Peer             │
//! │  sink   ◄── Reassembler (single slot) ◄── UDP ◄── Peer        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is best effort: no retransmission and at most one frame in
//! reassembly at a time. Lost or malformed traffic is only visible through
//! the drop counter.

mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fragment;
pub mod header;
pub mod reassembly;
pub mod stats;

// Re-exports for convenience
pub use config::TunnelConfig;
pub use endpoint::{FrameSink, TunnelEndpoint, TunnelHandle};
pub use error::{TunnelError, TunnelResult};
pub use fragment::Fragmenter;
pub use header::{TunnelHeader, HEADER_LEN, MAX_FRAME};
pub use reassembly::{Reassembler, Reassembly, RejectReason};
pub use stats::{RateMeter, TrafficRates, TrafficSnapshot, TunnelStats};

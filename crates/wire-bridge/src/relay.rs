//! Link Relay: moves frames between the TAP device and the tunnel.
//!
//! - TAP → tunnel: every frame read from the device is submitted to the
//!   endpoint's outbound queue.
//! - tunnel → TAP: the endpoint's frame-complete callback ([`TapSink`]) copies
//!   each reassembled frame into a bounded channel, and a writer task drains
//!   it into the device. The callback never waits on the device.

use bridge_tunnel::{FrameSink, TunnelError, TunnelHandle, TunnelResult};
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Frames buffered between the tunnel receive loop and the TAP writer.
pub const TAP_WRITE_QUEUE: usize = 16;

/// Relay-side drop counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Frames read from the device that the tunnel refused.
    eth_rx_dropped: AtomicU32,
    /// Reassembled frames discarded because the writer queue was full.
    eth_tx_dropped: AtomicU32,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eth_rx_dropped(&self) -> u32 {
        self.eth_rx_dropped.load(Ordering::Relaxed)
    }

    pub fn eth_tx_dropped(&self) -> u32 {
        self.eth_tx_dropped.load(Ordering::Relaxed)
    }
}

/// Frame sink that queues reassembled frames for the TAP writer.
pub struct TapSink {
    tx: mpsc::Sender<Bytes>,
    stats: Arc<RelayStats>,
}

impl FrameSink for TapSink {
    fn deliver(&mut self, frame: &[u8]) {
        match self.tx.try_send(Bytes::copy_from_slice(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.eth_tx_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("TAP write queue full, dropping {} byte frame", frame.len());
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.eth_tx_dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("TAP writer gone, dropping frame");
            }
        }
    }
}

/// Create the tunnel-side sink and the receiver the TAP writer drains.
pub fn tap_sink(depth: usize, stats: Arc<RelayStats>) -> (TapSink, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(depth);
    (TapSink { tx, stats }, rx)
}

/// Run the TAP → tunnel loop.
///
/// Frames the tunnel rejects (bad length, full queue) are counted and
/// skipped. Returns when the device fails or the endpoint is closed.
pub async fn run_tap_reader<R>(
    mut reader: R,
    buffer_size: usize,
    handle: TunnelHandle,
    stats: Arc<RelayStats>,
) -> TunnelResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let len = reader.read(&mut buf).await?;
        if len == 0 {
            log::info!("TAP device closed");
            return Ok(());
        }

        match handle.submit_outbound_frame(&buf[..len]) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                stats.eth_rx_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Dropped {} byte frame from TAP: {}", len, e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run the tunnel → TAP loop until the sink side is dropped.
pub async fn run_tap_writer<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> TunnelResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
    }
    Err(TunnelError::Closed)
}

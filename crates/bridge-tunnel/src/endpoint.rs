//! Tunnel endpoint.
//!
//! Owns the UDP socket, the outbound queue and the counters, and runs two
//! tasks:
//! 1. Outbound: queue → fragmenter → UDP
//! 2. Inbound: UDP → reassembler → frame sink
//!
//! The reassembler lives entirely inside the inbound task, so its slot needs
//! no locking. The bounded queue is the only synchronisation point between
//! frame producers and the outbound task; producers never wait on it.

use crate::clock::Instant;
use crate::config::{TunnelConfig, RECV_BUFFER_SIZE};
use crate::error::{TunnelError, TunnelResult};
use crate::fragment::Fragmenter;
use crate::header::{HEADER_LEN, MAX_FRAME};
use crate::reassembly::{Reassembler, Reassembly};
use crate::stats::TunnelStats;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

/// Extra wait past the reassembly deadline before checking for expiry, so
/// the slot is strictly older than the timeout when the check runs.
const EXPIRY_SLACK: Duration = Duration::from_millis(1);

/// Pause after a failed receive before trying again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Receives every fully reassembled frame.
///
/// Called synchronously on the inbound task. Implementations must not block;
/// hand the frame off to another task if delivery can wait. The slice is only
/// valid for the duration of the call.
pub trait FrameSink: Send + 'static {
    fn deliver(&mut self, frame: &[u8]);
}

impl<F> FrameSink for F
where
    F: FnMut(&[u8]) + Send + 'static,
{
    fn deliver(&mut self, frame: &[u8]) {
        self(frame)
    }
}

/// Cloneable submit side of a tunnel endpoint.
///
/// Safe to use from any thread, including outside the tokio runtime.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    outbound_tx: mpsc::Sender<Bytes>,
    stats: Arc<TunnelStats>,
}

impl TunnelHandle {
    /// Queue a copy of `frame` for transmission without blocking.
    ///
    /// Fails if the frame is empty or larger than [`MAX_FRAME`], or if the
    /// queue is full. Every failure is counted as a drop.
    pub fn submit_outbound_frame(&self, frame: &[u8]) -> TunnelResult<()> {
        if frame.is_empty() || frame.len() > MAX_FRAME {
            self.stats.record_dropped();
            return Err(TunnelError::FrameLength {
                len: frame.len(),
                max: MAX_FRAME,
            });
        }

        match self.outbound_tx.try_send(Bytes::copy_from_slice(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_dropped();
                Err(TunnelError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_dropped();
                Err(TunnelError::Closed)
            }
        }
    }

    /// Get the endpoint's traffic counters.
    pub fn stats(&self) -> &Arc<TunnelStats> {
        &self.stats
    }
}

/// A running tunnel endpoint.
///
/// Dropping the endpoint stops both tasks.
pub struct TunnelEndpoint {
    handle: TunnelHandle,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    mtu: u16,
    inbound: JoinHandle<TunnelResult<()>>,
    outbound: JoinHandle<TunnelResult<()>>,
}

impl TunnelEndpoint {
    /// Bind the UDP socket and start the tunnel tasks.
    ///
    /// Completed frames are passed to `sink`. Failing to bind is the only
    /// error; once running, bad traffic only shows up in the counters.
    pub async fn start<S: FrameSink>(config: TunnelConfig, sink: S) -> TunnelResult<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        Self::from_socket(socket, config, sink)
    }

    /// Start the tunnel on an already bound socket. `config.bind_addr` is
    /// ignored.
    pub fn from_socket<S: FrameSink>(
        socket: UdpSocket,
        config: TunnelConfig,
        sink: S,
    ) -> TunnelResult<Self> {
        config.validate()?;
        let local_addr = socket.local_addr()?;
        let mtu = usize::from(config.mtu);

        let stats = Arc::new(TunnelStats::new());
        let fragmenter = Fragmenter::new(mtu)?;
        let reassembler = Reassembler::new(mtu, config.reassembly_timeout(), stats.clone())?;
        let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(config.queue_depth);

        let socket = Arc::new(socket);

        let inbound = tokio::spawn(run_inbound(
            socket.clone(),
            reassembler,
            config.reassembly_timeout(),
            sink,
            stats.clone(),
        ));
        let outbound = tokio::spawn(run_outbound(
            socket,
            config.peer_addr,
            fragmenter,
            outbound_rx,
            stats.clone(),
        ));

        log::info!(
            "UDP tunnel: local={} peer={} payload={} queue={}",
            local_addr,
            config.peer_addr,
            config.mtu,
            config.queue_depth
        );

        Ok(Self {
            handle: TunnelHandle { outbound_tx, stats },
            local_addr,
            peer_addr: config.peer_addr,
            mtu: config.mtu,
            inbound,
            outbound,
        })
    }

    /// Queue a frame for transmission. See [`TunnelHandle::submit_outbound_frame`].
    pub fn submit_outbound_frame(&self, frame: &[u8]) -> TunnelResult<()> {
        self.handle.submit_outbound_frame(frame)
    }

    /// Cloneable submit handle for producers on other tasks or threads.
    pub fn handle(&self) -> TunnelHandle {
        self.handle.clone()
    }

    /// Get the traffic counters.
    pub fn stats(&self) -> &Arc<TunnelStats> {
        &self.handle.stats
    }

    /// Datagrams sent.
    pub fn sent(&self) -> u32 {
        self.handle.stats.sent()
    }

    /// Datagrams received.
    pub fn received(&self) -> u32 {
        self.handle.stats.received()
    }

    /// Datagrams and frames dropped.
    pub fn dropped(&self) -> u32 {
        self.handle.stats.dropped()
    }

    /// Get the address the UDP socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the peer address fragments are sent to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Wait until either task stops and return its result.
    pub async fn run_until_stopped(&mut self) -> TunnelResult<()> {
        tokio::select! {
            res = &mut self.inbound => handle_join_result(res, "inbound"),
            res = &mut self.outbound => handle_join_result(res, "outbound"),
        }
    }

    /// Stop both tasks.
    pub fn shutdown(&self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

impl Drop for TunnelEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receive datagrams and feed them to the reassembler.
///
/// While a frame is partially assembled the receive is bounded by the
/// reassembly deadline, so a stale slot is evicted even on a silent link.
/// The deadline runs on the tokio clock and restarts whenever a fragment is
/// stored.
async fn run_inbound<S: FrameSink>(
    socket: Arc<UdpSocket>,
    mut reassembler: Reassembler,
    timeout: Duration,
    mut sink: S,
    stats: Arc<TunnelStats>,
) -> TunnelResult<()> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut deadline: Option<time::Instant> = None;

    loop {
        let received = match deadline {
            Some(at) => match time::timeout_at(at, socket.recv_from(&mut buf)).await {
                Ok(res) => res,
                Err(_) => {
                    reassembler.discard_partial();
                    deadline = None;
                    continue;
                }
            },
            None => socket.recv_from(&mut buf).await,
        };

        let (len, from) = match received {
            Ok(res) => res,
            Err(e) => {
                back_off_after_receive_error(&e).await;
                continue;
            }
        };

        stats.record_received();
        log::trace!("<- {} bytes from {}", len, from);

        match reassembler.accept(&buf[..len], Instant::now()) {
            Reassembly::Complete(frame) => {
                sink.deliver(frame);
                deadline = None;
            }
            Reassembly::Incomplete => {
                deadline = Some(time::Instant::now() + timeout + EXPIRY_SLACK);
            }
            Reassembly::Rejected(_) => {
                if !reassembler.is_assembling() {
                    deadline = None;
                }
            }
        }
    }
}

/// Log a failed receive and pause so a persistent socket error cannot spin
/// the loop.
async fn back_off_after_receive_error(e: &std::io::Error) {
    log::warn!("UDP receive error: {}", e);
    time::sleep(RECV_ERROR_BACKOFF).await;
}

/// Fragment queued frames and send each fragment to the peer.
///
/// Sends are best effort: a failed fragment is counted as a drop and the
/// remaining fragments are still sent.
async fn run_outbound(
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    mut fragmenter: Fragmenter,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    stats: Arc<TunnelStats>,
) -> TunnelResult<()> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + fragmenter.mtu());

    while let Some(frame) = outbound_rx.recv().await {
        let fragments = match fragmenter.split(&frame) {
            Ok(fragments) => fragments,
            Err(e) => {
                log::debug!("Dropping outbound frame: {}", e);
                stats.record_dropped();
                continue;
            }
        };

        let sequence = fragments.sequence();
        for fragment in fragments {
            fragment.encode(&mut buf);
            match socket.send_to(&buf, peer_addr).await {
                Ok(_) => stats.record_sent(),
                Err(e) => {
                    log::debug!(
                        "Send failed for seq={} offset={}: {}",
                        sequence,
                        fragment.header.fragment_offset,
                        e
                    );
                    stats.record_dropped();
                }
            }
        }
    }

    Err(TunnelError::Closed)
}

/// Handle a JoinResult, propagating panics and converting other errors.
fn handle_join_result(
    res: Result<TunnelResult<()>, tokio::task::JoinError>,
    task_name: &str,
) -> TunnelResult<()> {
    match res {
        Ok(inner) => inner,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            log::debug!("{} task stopped: {}", task_name, e);
            Err(TunnelError::Closed)
        }
    }
}

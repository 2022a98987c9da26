//! Single-slot frame reassembler.
//!
//! At most one frame is assembled at a time. Fragments must sit on MTU
//! boundaries, so each one maps to a bit in a coverage bitmap; a frame is
//! complete once every bit for its `frame_length` is set. Duplicates never
//! double-count and arrival order does not matter.
//!
//! The slot is replaced whenever a fragment of a different
//! `(sequence, frame_length)` arrives, and evicted once it has seen no new
//! fragment for the configured timeout. Both count as a drop.
//!
//! Fragments of the frame that just completed are treated as duplicates for
//! one timeout period, so a replayed datagram cannot deliver the frame again.

use crate::clock::Instant;
use crate::error::{TunnelError, TunnelResult};
use crate::fragment::fragment_count;
use crate::header::{TunnelHeader, HEADER_LEN, MAX_FRAME, TUNNEL_MAGIC, TUNNEL_VERSION};
use crate::stats::TunnelStats;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default staleness timeout for a partially assembled frame.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(50);

const BITMAP_WORDS: usize = MAX_FRAME.div_ceil(64);

/// Why an inbound datagram was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Shorter than the tunnel header.
    Truncated,
    BadMagic,
    BadVersion,
    /// `frame_length` is zero or above [`MAX_FRAME`].
    FrameLength,
    /// Datagram size differs from header size plus `fragment_length`.
    DatagramLength,
    /// Fragment is empty or extends past the end of the frame.
    FragmentRange,
    /// Fragment does not start on an MTU boundary or has the wrong length
    /// for its position.
    Misaligned,
    /// Fragment already received for the frame in progress.
    Duplicate,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::Truncated => "truncated datagram",
            RejectReason::BadMagic => "bad magic",
            RejectReason::BadVersion => "bad version",
            RejectReason::FrameLength => "frame length out of range",
            RejectReason::DatagramLength => "datagram length mismatch",
            RejectReason::FragmentRange => "fragment empty or past end of frame",
            RejectReason::Misaligned => "misaligned fragment",
            RejectReason::Duplicate => "duplicate fragment",
        };
        f.write_str(reason)
    }
}

/// Result of feeding one datagram to the reassembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembly<'a> {
    /// Fragment stored; the frame still has gaps.
    Incomplete,
    /// Frame complete. The slot is idle again; the bytes stay valid until
    /// the next call.
    Complete(&'a [u8]),
    /// Datagram discarded and counted as a drop.
    Rejected(RejectReason),
}

/// Reassembly state for the one frame currently in flight.
struct Slot {
    active: bool,
    sequence: u16,
    frame_length: u16,
    expected: usize,
    received: usize,
    coverage: [u64; BITMAP_WORDS],
    buffer: Box<[u8]>,
    last_activity: Instant,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Self {
            active: false,
            sequence: 0,
            frame_length: 0,
            expected: 0,
            received: 0,
            coverage: [0; BITMAP_WORDS],
            buffer: vec![0u8; MAX_FRAME].into_boxed_slice(),
            last_activity: now,
        }
    }

    fn matches(&self, header: &TunnelHeader) -> bool {
        self.active && self.sequence == header.sequence && self.frame_length == header.frame_length
    }

    fn begin(&mut self, header: &TunnelHeader, mtu: usize, now: Instant) {
        self.active = true;
        self.sequence = header.sequence;
        self.frame_length = header.frame_length;
        self.expected = fragment_count(usize::from(header.frame_length), mtu);
        self.received = 0;
        self.coverage = [0; BITMAP_WORDS];
        self.last_activity = now;
    }

    /// Mark fragment `index` as present. Returns false if it already was.
    fn mark(&mut self, index: usize) -> bool {
        let (word, bit) = (index / 64, index % 64);
        let mask = 1u64 << bit;
        if self.coverage[word] & mask != 0 {
            return false;
        }
        self.coverage[word] |= mask;
        self.received += 1;
        true
    }
}

/// Reassembles tunnel datagrams back into Ethernet frames.
pub struct Reassembler {
    mtu: usize,
    timeout: Duration,
    slot: Slot,
    /// `(sequence, frame_length, completed_at)` of the last delivered frame.
    last_completed: Option<(u16, u16, Instant)>,
    stats: Arc<TunnelStats>,
}

impl Reassembler {
    /// Create a reassembler for fragments of at most `mtu` bytes.
    ///
    /// `mtu` must match the peer's sender; it determines where fragments
    /// may start and how many make up a frame.
    pub fn new(mtu: usize, timeout: Duration, stats: Arc<TunnelStats>) -> TunnelResult<Self> {
        if mtu == 0 || mtu > MAX_FRAME {
            return Err(TunnelError::Config(format!(
                "MTU {} out of range (1..={})",
                mtu, MAX_FRAME
            )));
        }
        Ok(Self {
            mtu,
            timeout,
            slot: Slot::new(Instant::now()),
            last_completed: None,
            stats,
        })
    }

    /// Whether a frame is partially assembled.
    pub fn is_assembling(&self) -> bool {
        self.slot.active
    }

    /// `(sequence, frame_length)` of the frame in progress.
    pub fn in_progress(&self) -> Option<(u16, u16)> {
        self.slot
            .active
            .then_some((self.slot.sequence, self.slot.frame_length))
    }

    /// Time left before the slot goes stale, or `None` when idle.
    pub fn time_until_expiry(&self, now: Instant) -> Option<Duration> {
        if !self.slot.active {
            return None;
        }
        let idle = now.duration_since(self.slot.last_activity);
        Some(self.timeout.saturating_sub(idle))
    }

    /// Evict the slot if it has been idle longer than the timeout.
    ///
    /// Returns true if a partial frame was discarded.
    pub fn expire(&mut self, now: Instant) -> bool {
        if !self.slot.active {
            return false;
        }
        if now.duration_since(self.slot.last_activity) <= self.timeout {
            return false;
        }
        self.discard_partial()
    }

    /// Evict the partial frame regardless of its age, counting a drop.
    ///
    /// Used by callers that track the idle deadline on their own timer.
    /// Returns true if a partial frame was discarded.
    pub fn discard_partial(&mut self) -> bool {
        if !self.slot.active {
            return false;
        }

        log::debug!(
            "Reassembly timeout: seq={} len={} ({}/{} fragments)",
            self.slot.sequence,
            self.slot.frame_length,
            self.slot.received,
            self.slot.expected
        );
        self.slot.active = false;
        self.stats.record_dropped();
        true
    }

    /// Feed one inbound datagram.
    pub fn accept(&mut self, datagram: &[u8], now: Instant) -> Reassembly<'_> {
        self.expire(now);

        let header = match self.validate(datagram) {
            Ok(header) => header,
            Err(reason) => return self.reject(reason),
        };

        if self.is_replay(&header, now) {
            return self.reject(RejectReason::Duplicate);
        }

        if !self.slot.matches(&header) {
            if self.slot.active {
                log::debug!(
                    "Discarding partial frame seq={} ({}/{} fragments) for seq={}",
                    self.slot.sequence,
                    self.slot.received,
                    self.slot.expected,
                    header.sequence
                );
                self.stats.record_dropped();
            }
            self.slot.begin(&header, self.mtu, now);
        }

        let offset = usize::from(header.fragment_offset);
        if !self.slot.mark(offset / self.mtu) {
            return self.reject(RejectReason::Duplicate);
        }

        let payload = &datagram[HEADER_LEN..];
        self.slot.buffer[offset..offset + payload.len()].copy_from_slice(payload);
        self.slot.last_activity = now;

        if self.slot.received < self.slot.expected {
            return Reassembly::Incomplete;
        }

        self.slot.active = false;
        self.last_completed = Some((self.slot.sequence, self.slot.frame_length, now));
        let frame_length = usize::from(self.slot.frame_length);
        log::trace!(
            "Reassembled seq={} len={}",
            self.slot.sequence,
            frame_length
        );
        Reassembly::Complete(&self.slot.buffer[..frame_length])
    }

    /// Whether `header` belongs to the frame completed within the last
    /// timeout period.
    fn is_replay(&self, header: &TunnelHeader, now: Instant) -> bool {
        match self.last_completed {
            Some((sequence, frame_length, at)) => {
                sequence == header.sequence
                    && frame_length == header.frame_length
                    && now.duration_since(at) <= self.timeout
            }
            None => false,
        }
    }

    fn reject(&self, reason: RejectReason) -> Reassembly<'static> {
        log::debug!("Dropping datagram: {}", reason);
        self.stats.record_dropped();
        Reassembly::Rejected(reason)
    }

    fn validate(&self, datagram: &[u8]) -> Result<TunnelHeader, RejectReason> {
        let header = TunnelHeader::decode(datagram).ok_or(RejectReason::Truncated)?;

        if header.magic != TUNNEL_MAGIC {
            return Err(RejectReason::BadMagic);
        }
        if header.version != TUNNEL_VERSION {
            return Err(RejectReason::BadVersion);
        }

        let frame_length = usize::from(header.frame_length);
        if frame_length == 0 || frame_length > MAX_FRAME {
            return Err(RejectReason::FrameLength);
        }
        if datagram.len() != HEADER_LEN + usize::from(header.fragment_length) {
            return Err(RejectReason::DatagramLength);
        }
        if header.fragment_length == 0 || header.fragment_end() > frame_length {
            return Err(RejectReason::FragmentRange);
        }

        let offset = usize::from(header.fragment_offset);
        let expected_len = self.mtu.min(frame_length - offset);
        if offset % self.mtu != 0 || usize::from(header.fragment_length) != expected_len {
            return Err(RejectReason::Misaligned);
        }

        Ok(header)
    }
}

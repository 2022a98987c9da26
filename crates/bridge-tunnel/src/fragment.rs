//! Fragmenting sender.
//!
//! Splits an outbound Ethernet frame into MTU-sized fragments. All fragments
//! of one frame share a sequence number; the sequence advances once per frame
//! and wraps at 65536.

use crate::error::{TunnelError, TunnelResult};
use crate::header::{TunnelHeader, HEADER_LEN, MAX_FRAME};
use bytes::{BufMut, BytesMut};

/// Sequence number given to the first frame after startup.
pub const FIRST_SEQUENCE: u16 = 1;

/// Assigns sequence numbers and splits frames into fragments.
#[derive(Debug)]
pub struct Fragmenter {
    mtu: usize,
    next_sequence: u16,
}

impl Fragmenter {
    /// Create a fragmenter producing payloads of at most `mtu` bytes.
    ///
    /// # Errors
    /// Returns an error if `mtu` is zero or larger than [`MAX_FRAME`].
    pub fn new(mtu: usize) -> TunnelResult<Self> {
        if mtu == 0 || mtu > MAX_FRAME {
            return Err(TunnelError::Config(format!(
                "MTU {} out of range (1..={})",
                mtu, MAX_FRAME
            )));
        }
        Ok(Self {
            mtu,
            next_sequence: FIRST_SEQUENCE,
        })
    }

    /// Get the maximum fragment payload.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u16 {
        self.next_sequence
    }

    /// Split `frame` into fragments.
    ///
    /// Consumes one sequence number on success. Empty and oversized frames
    /// are rejected before any sequence number is used.
    pub fn split<'a>(&mut self, frame: &'a [u8]) -> TunnelResult<Fragments<'a>> {
        if frame.is_empty() || frame.len() > MAX_FRAME {
            return Err(TunnelError::FrameLength {
                len: frame.len(),
                max: MAX_FRAME,
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        Ok(Fragments {
            frame,
            sequence,
            mtu: self.mtu,
            offset: 0,
        })
    }
}

/// Number of fragments a frame of `frame_len` bytes is split into.
pub fn fragment_count(frame_len: usize, mtu: usize) -> usize {
    frame_len.div_ceil(mtu)
}

/// One fragment ready to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub header: TunnelHeader,
    pub payload: &'a [u8],
}

impl Fragment<'_> {
    /// Write header and payload into `buf`, replacing its contents.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.clear();
        buf.reserve(self.datagram_len());
        self.header.encode_into(buf);
        buf.put_slice(self.payload);
    }

    /// Total datagram length on the wire.
    pub fn datagram_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Iterator over the fragments of one frame, in increasing offset order.
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    frame: &'a [u8],
    sequence: u16,
    mtu: usize,
    offset: usize,
}

impl Fragments<'_> {
    /// Sequence number shared by every fragment of this frame.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.frame.len() {
            return None;
        }

        let len = self.mtu.min(self.frame.len() - self.offset);
        let payload = &self.frame[self.offset..self.offset + len];
        // Frame length and offsets are bounded by MAX_FRAME, so they fit in u16.
        let header = TunnelHeader::fragment(
            self.sequence,
            self.frame.len() as u16,
            self.offset as u16,
            len as u16,
        );
        self.offset += len;

        Some(Fragment { header, payload })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = fragment_count(self.frame.len() - self.offset, self.mtu);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Fragments<'_> {}

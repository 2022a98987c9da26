//! Tunnel header carried at the front of every UDP datagram.
//!
//! Wire layout (12 bytes, little-endian, no padding):
//! ```text
//! ┌───────┬─────┬───────┬──────┬───────────┬─────────────┬─────────────┐
//! │ magic │ ver │ flags │ seq  │ frame_len │ frag_offset │ frag_length │
//! │  u16  │ u8  │  u8   │ u16  │    u16    │     u16     │     u16     │
//! └───────┴─────┴───────┴──────┴───────────┴─────────────┴─────────────┘
//! ```
//! followed by exactly `frag_length` payload bytes.

use bytes::{BufMut, BytesMut};

/// Protocol magic.
pub const TUNNEL_MAGIC: u16 = 0xBEEF;

/// Protocol version.
pub const TUNNEL_VERSION: u8 = 1;

/// Flag bit: datagram carries a fragment of a larger frame.
pub const FLAG_FRAGMENT: u8 = 1 << 0;

/// Size of the encoded header.
pub const HEADER_LEN: usize = 12;

/// Largest Ethernet frame the tunnel carries (tagged frames included).
pub const MAX_FRAME: usize = 1600;

/// Decoded tunnel header.
///
/// Decoding never fails on a full-size input; whether the values make sense
/// is decided by the reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunnelHeader {
    pub magic: u16,
    pub version: u8,
    pub flags: u8,
    pub sequence: u16,
    pub frame_length: u16,
    pub fragment_offset: u16,
    pub fragment_length: u16,
}

impl TunnelHeader {
    /// Header for one fragment of a frame, with protocol constants filled in.
    pub fn fragment(
        sequence: u16,
        frame_length: u16,
        fragment_offset: u16,
        fragment_length: u16,
    ) -> Self {
        Self {
            magic: TUNNEL_MAGIC,
            version: TUNNEL_VERSION,
            flags: FLAG_FRAGMENT,
            sequence,
            frame_length,
            fragment_offset,
            fragment_length,
        }
    }

    /// Decode the leading [`HEADER_LEN`] bytes of a datagram.
    ///
    /// Returns `None` only when fewer than [`HEADER_LEN`] bytes are given.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
        Some(Self::from(*raw))
    }

    /// Serialize to the 12-byte wire form.
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2] = self.version;
        out[3] = self.flags;
        out[4..6].copy_from_slice(&self.sequence.to_le_bytes());
        out[6..8].copy_from_slice(&self.frame_length.to_le_bytes());
        out[8..10].copy_from_slice(&self.fragment_offset.to_le_bytes());
        out[10..12].copy_from_slice(&self.fragment_length.to_le_bytes());
        out
    }

    /// Append the header to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.to_bytes());
    }

    pub fn is_fragment(&self) -> bool {
        self.flags & FLAG_FRAGMENT != 0
    }

    /// End offset of this fragment within the frame.
    pub fn fragment_end(&self) -> usize {
        usize::from(self.fragment_offset) + usize::from(self.fragment_length)
    }
}

impl From<[u8; HEADER_LEN]> for TunnelHeader {
    fn from(value: [u8; HEADER_LEN]) -> Self {
        Self {
            magic: u16::from_le_bytes([value[0], value[1]]),
            version: value[2],
            flags: value[3],
            sequence: u16::from_le_bytes([value[4], value[5]]),
            frame_length: u16::from_le_bytes([value[6], value[7]]),
            fragment_offset: u16::from_le_bytes([value[8], value[9]]),
            fragment_length: u16::from_le_bytes([value[10], value[11]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let header = TunnelHeader::fragment(0x0102, 0x0304, 0x0506, 0x0708);
        let bytes = header.to_bytes();
        assert_eq!(
            bytes,
            [0xEF, 0xBE, 0x01, 0x01, 0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]
        );
    }

    #[test]
    fn test_decode_matches_encode() {
        let header = TunnelHeader::fragment(65535, 1600, 1200, 400);
        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);
        buf.put_slice(b"payload");

        assert_eq!(buf.len(), HEADER_LEN + 7);
        assert_eq!(TunnelHeader::decode(&buf), Some(header));
    }

    #[test]
    fn test_decode_arbitrary_bytes() {
        // Garbage still decodes; validity is judged elsewhere.
        let header = TunnelHeader::decode(&[0xFF; HEADER_LEN]).unwrap();
        assert_eq!(header.magic, 0xFFFF);
        assert_eq!(header.fragment_length, 0xFFFF);
        assert_eq!(header.fragment_end(), 0x1FFFE);
    }

    #[test]
    fn test_decode_short_input() {
        assert_eq!(TunnelHeader::decode(&[0u8; HEADER_LEN - 1]), None);
        assert_eq!(TunnelHeader::decode(&[]), None);
    }

    #[test]
    fn test_fragment_flag() {
        let header = TunnelHeader::fragment(1, 10, 0, 10);
        assert!(header.is_fragment());
        assert!(!TunnelHeader::default().is_fragment());
    }
}

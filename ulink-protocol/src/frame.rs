//! Link Frame Format and Checksum
//!
//! A frame is a preamble byte, one header byte, an optional length byte,
//! the payload and a big-endian CRC-16:
//!
//! ```text
//! +------+--------+---------+-----------+---------+
//! | 0xFD | header | [len]   | payload   | crc16   |
//! +------+--------+---------+-----------+---------+
//!          kind:2 seqno:4 sel:2
//! ```
//!
//! A length selector of 0 means an empty payload and no length byte. For
//! selectors 1..=3 the payload length is `(sel - 1) * 256 + len + 1`. The
//! checksum (CRC-16/IBM-3740) covers everything after the preamble.

use crate::sequence::SeqNo;
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_IBM_3740};
use std::fmt;
use thiserror::Error;

/// Frame start marker
pub const PREAMBLE: u8 = 0xFD;

/// Largest payload a frame can carry (three length-selector pages of 256)
pub const MAX_PAYLOAD: usize = 768;

/// Preamble, header and length byte
pub const MAX_HEADER_SIZE: usize = 3;

/// Trailing checksum bytes
pub const CRC_SIZE: usize = 2;

/// Upper bound for an encoded frame
pub const MAX_FRAME_SIZE: usize = MAX_HEADER_SIZE + MAX_PAYLOAD + CRC_SIZE;

/// Frame checksum algorithm (poly 0x1021, init 0xFFFF, not reflected)
pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the frame checksum over `data`
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Frame errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Expected preamble, found {0:#04x}")]
    BadPreamble(u8),

    #[error("Frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Checksum mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { received: u16, computed: u16 },
}

/// Frame kind (bits 7-6 of the header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Data, no acknowledgement requested
    Unsynced = 0,
    /// Data, acknowledgement requested
    Synced = 1,
    /// Acknowledgement, may carry a reply payload
    Ack = 2,
    /// Negative acknowledgement, payload is a single reason byte
    Nack = 3,
}

impl FrameKind {
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0 => FrameKind::Unsynced,
            1 => FrameKind::Synced,
            2 => FrameKind::Ack,
            3 => FrameKind::Nack,
            _ => unreachable!(),
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }

    /// True for the two data kinds
    pub fn is_data(self) -> bool {
        matches!(self, FrameKind::Unsynced | FrameKind::Synced)
    }
}

/// Reason codes carried by NACK frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NackReason {
    /// Bytes arrived that were not a preamble
    NotPreamble = 1,
    /// Frame checksum did not match
    BadChecksum = 2,
    /// Frame was not completed within the receive timeout
    FrameTimeout = 3,
    /// Receiver cannot take frames right now
    NotReady = 4,
}

impl NackReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(NackReason::NotPreamble),
            2 => Some(NackReason::BadChecksum),
            3 => Some(NackReason::FrameTimeout),
            4 => Some(NackReason::NotReady),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Reasons that make the sender retransmit at once
    pub fn triggers_resend(self) -> bool {
        matches!(self, NackReason::BadChecksum | NackReason::FrameTimeout)
    }
}

/// Decoded header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: FrameKind,
    pub seqno: SeqNo,
    /// Length selector, 0 for an empty payload
    pub selector: u8,
}

impl Header {
    /// Build the header for a payload of `len` bytes
    pub fn new(kind: FrameKind, seqno: SeqNo, len: usize) -> Result<Self, FrameError> {
        Ok(Header {
            kind,
            seqno,
            selector: length_selector(len)?,
        })
    }

    pub fn from_byte(byte: u8) -> Self {
        Header {
            kind: FrameKind::from_bits(byte >> 6),
            seqno: SeqNo::from_bits(byte >> 2),
            selector: byte & 0b11,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.kind.as_bits() << 6) | (self.seqno.as_raw() << 2) | (self.selector & 0b11)
    }

    /// True when a length byte follows the header
    pub fn has_length(self) -> bool {
        self.selector != 0
    }
}

/// Length selector for a payload of `len` bytes
pub fn length_selector(len: usize) -> Result<u8, FrameError> {
    if len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    if len == 0 {
        Ok(0)
    } else {
        Ok((((len - 1) >> 8) + 1) as u8)
    }
}

/// Length byte for a non-empty payload
#[inline]
pub fn length_byte(len: usize) -> u8 {
    ((len - 1) & 0xFF) as u8
}

/// Payload length from a nonzero selector and its length byte
#[inline]
pub fn payload_len(selector: u8, length_byte: u8) -> usize {
    (((selector as usize) - 1) << 8) + length_byte as usize + 1
}

/// Encoded size of a frame carrying `len` payload bytes
pub fn wire_len(len: usize) -> usize {
    if len == 0 {
        2 + CRC_SIZE
    } else {
        MAX_HEADER_SIZE + len + CRC_SIZE
    }
}

/// Append one encoded frame to `dst`
pub fn encode_into(
    kind: FrameKind,
    seqno: SeqNo,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<(), FrameError> {
    let header = Header::new(kind, seqno, payload.len())?;

    dst.reserve(wire_len(payload.len()));
    let start = dst.len();
    dst.put_u8(PREAMBLE);
    dst.put_u8(header.to_byte());
    if header.has_length() {
        dst.put_u8(length_byte(payload.len()));
        dst.put_slice(payload);
    }
    let crc = checksum(&dst[start + 1..]);
    dst.put_u16(crc);
    Ok(())
}

/// A complete link frame
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seqno: SeqNo,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, rejecting oversize payloads
    pub fn new(kind: FrameKind, seqno: SeqNo, payload: Bytes) -> Result<Self, FrameError> {
        length_selector(payload.len())?;
        Ok(Frame {
            kind,
            seqno,
            payload,
        })
    }

    /// NACK frame for `seqno`
    pub fn nack(reason: NackReason, seqno: SeqNo) -> Self {
        Frame {
            kind: FrameKind::Nack,
            seqno,
            payload: Bytes::copy_from_slice(&[reason.as_u8()]),
        }
    }

    /// Reason carried by a NACK frame
    pub fn nack_reason(&self) -> Option<NackReason> {
        if self.kind != FrameKind::Nack {
            return None;
        }
        self.payload.first().copied().and_then(NackReason::from_u8)
    }

    /// Serialize the frame
    pub fn to_bytes(&self) -> Result<BytesMut, FrameError> {
        let mut buf = BytesMut::with_capacity(wire_len(self.payload.len()));
        encode_into(self.kind, self.seqno, &self.payload, &mut buf)?;
        Ok(buf)
    }

    /// Parse one frame from the start of `bytes`
    ///
    /// Returns the frame and the number of bytes it occupied.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        let need = |needed: usize| {
            if bytes.len() < needed {
                Err(FrameError::Truncated {
                    needed,
                    available: bytes.len(),
                })
            } else {
                Ok(())
            }
        };

        need(2)?;
        if bytes[0] != PREAMBLE {
            return Err(FrameError::BadPreamble(bytes[0]));
        }
        let header = Header::from_byte(bytes[1]);
        let (body_end, payload) = if header.has_length() {
            need(3)?;
            let len = payload_len(header.selector, bytes[2]);
            need(3 + len)?;
            (3 + len, &bytes[3..3 + len])
        } else {
            (2, &bytes[2..2])
        };
        need(body_end + CRC_SIZE)?;

        let received = u16::from_be_bytes([bytes[body_end], bytes[body_end + 1]]);
        let computed = checksum(&bytes[1..body_end]);
        if received != computed {
            return Err(FrameError::ChecksumMismatch { received, computed });
        }

        Ok((
            Frame {
                kind: header.kind,
                seqno: header.seqno,
                payload: Bytes::copy_from_slice(payload),
            },
            body_end + CRC_SIZE,
        ))
    }

    /// Encoded size of this frame
    pub fn wire_len(&self) -> usize {
        wire_len(self.payload.len())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("seqno", &self.seqno)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_check_value() {
        // CRC-16/IBM-3740 check value for "123456789"
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_empty_ack_encoding() {
        let frame = Frame::new(FrameKind::Ack, SeqNo::NONE, Bytes::new()).unwrap();
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0xFD, 0x80, 0x70, 0x78]);
    }

    #[test]
    fn test_nack_layout() {
        let bytes = Frame::nack(NackReason::BadChecksum, SeqNo::new(5))
            .to_bytes()
            .unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(bytes[0], PREAMBLE);
        assert_eq!(bytes[1], (3 << 6) | (5 << 2) | 1);
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[3], 2);
        let crc = checksum(&bytes[1..4]);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), crc);
    }

    #[test]
    fn test_length_selector_boundaries() {
        assert_eq!(length_selector(0).unwrap(), 0);
        assert_eq!(length_selector(1).unwrap(), 1);
        assert_eq!(length_selector(256).unwrap(), 1);
        assert_eq!(length_selector(257).unwrap(), 2);
        assert_eq!(length_selector(512).unwrap(), 2);
        assert_eq!(length_selector(513).unwrap(), 3);
        assert_eq!(length_selector(768).unwrap(), 3);
        assert!(matches!(
            length_selector(769),
            Err(FrameError::PayloadTooLarge { len: 769, .. })
        ));
    }

    #[test]
    fn test_payload_len_decoding() {
        for len in [1usize, 2, 255, 256, 257, 300, 512, 513, 767, 768] {
            let sel = length_selector(len).unwrap();
            assert_eq!(payload_len(sel, length_byte(len)), len);
        }
    }

    #[test]
    fn test_header_byte_roundtrip() {
        let header = Header {
            kind: FrameKind::Synced,
            seqno: SeqNo::new(9),
            selector: 2,
        };
        assert_eq!(Header::from_byte(header.to_byte()), header);
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from((0..300u32).map(|i| i as u8).collect::<Vec<_>>());
        let frame = Frame::new(FrameKind::Synced, SeqNo::new(3), payload).unwrap();
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), frame.wire_len());

        let (decoded, used) = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_corrupt_frame_detected() {
        let frame = Frame::new(FrameKind::Unsynced, SeqNo::NONE, Bytes::from_static(b"hello"))
            .unwrap();
        let mut bytes = frame.to_bytes().unwrap();
        bytes[4] ^= 0x01;
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = Frame::new(FrameKind::Synced, SeqNo::new(1), Bytes::from_static(b"abc"))
            .unwrap();
        let bytes = frame.to_bytes().unwrap();
        assert!(matches!(
            Frame::from_bytes(&bytes[..bytes.len() - 1]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_nack_reason_parse() {
        let frame = Frame::nack(NackReason::FrameTimeout, SeqNo::new(2));
        assert_eq!(frame.nack_reason(), Some(NackReason::FrameTimeout));
        assert!(NackReason::FrameTimeout.triggers_resend());
        assert!(!NackReason::NotPreamble.triggers_resend());
        assert_eq!(NackReason::from_u8(9), None);
    }
}

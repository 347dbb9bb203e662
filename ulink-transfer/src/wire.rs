//! File Transfer Messages
//!
//! All messages start with a command byte; integers are big-endian.
//!
//! ```text
//! send-file request  [0x10][length u32][mtu u16][dt_min u32][dt_max u32][name_len u8][name]
//! send-file reply    [0x10][status u8][mtu u16][dt_min u32][dt_max u32][session u16]
//! data chunk         [0x11][session u16][index u32][data]
//! status report      [0x12][session u16][status u8][base u32][mask u32]
//! status reply       [0x12][status u8][dt u32]
//! ```
//!
//! Requests, chunks and reports travel as link packets; the two replies
//! travel as acknowledgement payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulink_protocol::MAX_PAYLOAD;

pub const CMD_SEND_FILE: u8 = 0x10;
pub const CMD_DATA_CHUNK: u8 = 0x11;
pub const CMD_STATUS: u8 = 0x12;

/// Fixed part of a send-file request
pub const SEND_FILE_HEADER_SIZE: usize = 16;
pub const SEND_FILE_REPLY_SIZE: usize = 14;
/// Command, session and index in front of chunk data
pub const CHUNK_HEADER_SIZE: usize = 7;
pub const STATUS_REPORT_SIZE: usize = 12;
pub const STATUS_REPLY_SIZE: usize = 6;

pub const MAX_NAME_LEN: usize = 255;

pub const DEFAULT_MTU: u16 = 250;
pub const DEFAULT_DT_MIN: u32 = 7;
pub const DEFAULT_DT_MAX: u32 = 10;

/// Largest chunk that still fits one link frame
pub const MAX_MTU: u16 = (MAX_PAYLOAD - CHUNK_HEADER_SIZE) as u16;

/// Wire decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Empty message")]
    Empty,

    #[error("Unknown command {0:#04x}")]
    UnknownCommand(u8),

    #[error("Unexpected command {found:#04x}, wanted {expected:#04x}")]
    UnexpectedCommand { expected: u8, found: u8 },

    #[error("Bad length for command {cmd:#04x}: {len} bytes")]
    BadLength { cmd: u8, len: usize },

    #[error("Unknown status code {0}")]
    BadStatus(u8),
}

/// Transfer status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferStatus {
    Ok = 0,
    Finished = 1,
    Abort = 2,
}

impl TransferStatus {
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(TransferStatus::Ok),
            1 => Ok(TransferStatus::Finished),
            2 => Ok(TransferStatus::Abort),
            other => Err(WireError::BadStatus(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Transfer parameters proposed by one side; zero means "no preference"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferParams {
    /// Chunk size in bytes
    pub mtu: u16,
    /// Lower bound of the chunk interval, in ticks
    pub dt_min: u32,
    /// Upper bound of the chunk interval, in ticks
    pub dt_max: u32,
}

impl Default for TransferParams {
    fn default() -> Self {
        TransferParams {
            mtu: DEFAULT_MTU,
            dt_min: DEFAULT_DT_MIN,
            dt_max: DEFAULT_DT_MAX,
        }
    }
}

impl TransferParams {
    pub fn new(mtu: u16, dt_min: u32, dt_max: u32) -> Self {
        TransferParams {
            mtu,
            dt_min,
            dt_max,
        }
    }

    /// Parameters with no preference at all
    pub fn unspecified() -> Self {
        TransferParams::new(0, 0, 0)
    }

    /// Combine the sender's and receiver's proposals
    ///
    /// The smaller MTU and `dt_max` win, the larger `dt_min` wins. A zero
    /// proposal defers to the other side, and protocol defaults fill in when
    /// both are zero.
    pub fn negotiate(sender: &TransferParams, receiver: &TransferParams) -> TransferParams {
        let mtu = pick(sender.mtu as u32, receiver.mtu as u32, u32::min, DEFAULT_MTU as u32);
        let dt_min = pick(sender.dt_min, receiver.dt_min, u32::max, DEFAULT_DT_MIN);
        let dt_max = pick(sender.dt_max, receiver.dt_max, u32::min, DEFAULT_DT_MAX);

        TransferParams {
            mtu: mtu.min(MAX_MTU as u32) as u16,
            dt_min,
            dt_max: dt_max.max(dt_min),
        }
    }

    /// Starting chunk interval, a quarter of the way into the range
    pub fn initial_dt(&self) -> u32 {
        self.dt_max.saturating_sub(self.dt_min) / 4 + self.dt_min
    }

    /// Number of chunks in a transfer of `length` bytes
    pub fn chunk_count(&self, length: u64) -> u64 {
        if self.mtu == 0 {
            return 0;
        }
        (length + self.mtu as u64 - 1) / self.mtu as u64
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtu);
        buf.put_u32(self.dt_min);
        buf.put_u32(self.dt_max);
    }

    fn get(buf: &mut &[u8]) -> Self {
        TransferParams {
            mtu: buf.get_u16(),
            dt_min: buf.get_u32(),
            dt_max: buf.get_u32(),
        }
    }
}

fn pick(tx: u32, rx: u32, choose: fn(u32, u32) -> u32, default: u32) -> u32 {
    let value = match (tx, rx) {
        (0, rx) => rx,
        (tx, 0) => tx,
        (tx, rx) => choose(tx, rx),
    };
    if value == 0 {
        default
    } else {
        value
    }
}

/// Longest prefix of `name` that fits the length byte, cut on a char boundary
fn truncate_name(name: &str) -> &str {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

fn expect_cmd(bytes: &[u8], cmd: u8) -> Result<(), WireError> {
    match bytes.first() {
        None => Err(WireError::Empty),
        Some(&found) if found != cmd => Err(WireError::UnexpectedCommand {
            expected: cmd,
            found,
        }),
        Some(_) => Ok(()),
    }
}

/// Request to start a transfer, sent synced by the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFileRequest {
    pub length: u32,
    pub params: TransferParams,
    pub name: Option<String>,
}

impl SendFileRequest {
    pub fn to_bytes(&self) -> BytesMut {
        let name = truncate_name(self.name.as_deref().unwrap_or("")).as_bytes();

        let mut buf = BytesMut::with_capacity(SEND_FILE_HEADER_SIZE + name.len());
        buf.put_u8(CMD_SEND_FILE);
        buf.put_u32(self.length);
        self.params.put(&mut buf);
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        expect_cmd(bytes, CMD_SEND_FILE)?;
        let bad_len = WireError::BadLength {
            cmd: CMD_SEND_FILE,
            len: bytes.len(),
        };
        if bytes.len() < SEND_FILE_HEADER_SIZE {
            return Err(bad_len);
        }

        let mut buf = &bytes[1..];
        let length = buf.get_u32();
        let params = TransferParams::get(&mut buf);
        let name_len = buf.get_u8() as usize;
        if buf.len() < name_len {
            return Err(bad_len);
        }
        let name = (name_len > 0).then(|| String::from_utf8_lossy(&buf[..name_len]).into_owned());

        Ok(SendFileRequest {
            length,
            params,
            name,
        })
    }
}

/// Receiver's answer to a send-file request, sent as the ack payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendFileReply {
    pub status: TransferStatus,
    pub params: TransferParams,
    pub session: u16,
}

impl SendFileReply {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(SEND_FILE_REPLY_SIZE);
        buf.put_u8(CMD_SEND_FILE);
        buf.put_u8(self.status.as_u8());
        self.params.put(&mut buf);
        buf.put_u16(self.session);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        expect_cmd(bytes, CMD_SEND_FILE)?;
        if bytes.len() != SEND_FILE_REPLY_SIZE {
            return Err(WireError::BadLength {
                cmd: CMD_SEND_FILE,
                len: bytes.len(),
            });
        }

        let mut buf = &bytes[1..];
        let status = TransferStatus::from_u8(buf.get_u8())?;
        let params = TransferParams::get(&mut buf);
        let session = buf.get_u16();
        Ok(SendFileReply {
            status,
            params,
            session,
        })
    }
}

/// One chunk of file data, sent unsynced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub session: u16,
    pub index: u32,
    pub data: Bytes,
}

impl DataChunk {
    /// Encode a chunk without building the struct first
    pub fn encode(session: u16, index: u32, data: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + data.len());
        buf.put_u8(CMD_DATA_CHUNK);
        buf.put_u16(session);
        buf.put_u32(index);
        buf.put_slice(data);
        buf
    }

    pub fn to_bytes(&self) -> BytesMut {
        DataChunk::encode(self.session, self.index, &self.data)
    }

    pub fn from_bytes(bytes: Bytes) -> Result<Self, WireError> {
        expect_cmd(&bytes, CMD_DATA_CHUNK)?;
        if bytes.len() < CHUNK_HEADER_SIZE {
            return Err(WireError::BadLength {
                cmd: CMD_DATA_CHUNK,
                len: bytes.len(),
            });
        }

        let mut header = &bytes[1..CHUNK_HEADER_SIZE];
        let session = header.get_u16();
        let index = header.get_u32();
        Ok(DataChunk {
            session,
            index,
            data: bytes.slice(CHUNK_HEADER_SIZE..),
        })
    }
}

/// Receiver's window report, sent synced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub session: u16,
    pub status: TransferStatus,
    /// First chunk not yet received
    pub base: u32,
    /// Bit `i` set when chunk `base + 1 + i` was received
    pub mask: u32,
}

impl StatusReport {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(STATUS_REPORT_SIZE);
        buf.put_u8(CMD_STATUS);
        buf.put_u16(self.session);
        buf.put_u8(self.status.as_u8());
        buf.put_u32(self.base);
        buf.put_u32(self.mask);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        expect_cmd(bytes, CMD_STATUS)?;
        if bytes.len() != STATUS_REPORT_SIZE {
            return Err(WireError::BadLength {
                cmd: CMD_STATUS,
                len: bytes.len(),
            });
        }

        let mut buf = &bytes[1..];
        let session = buf.get_u16();
        let status = TransferStatus::from_u8(buf.get_u8())?;
        Ok(StatusReport {
            session,
            status,
            base: buf.get_u32(),
            mask: buf.get_u32(),
        })
    }
}

/// Sender's answer to a status report, sent as the ack payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    pub status: TransferStatus,
    /// Chunk interval the sender uses from now on
    pub dt: u32,
}

impl StatusReply {
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(STATUS_REPLY_SIZE);
        buf.put_u8(CMD_STATUS);
        buf.put_u8(self.status.as_u8());
        buf.put_u32(self.dt);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        expect_cmd(bytes, CMD_STATUS)?;
        if bytes.len() != STATUS_REPLY_SIZE {
            return Err(WireError::BadLength {
                cmd: CMD_STATUS,
                len: bytes.len(),
            });
        }

        let mut buf = &bytes[1..];
        let status = TransferStatus::from_u8(buf.get_u8())?;
        Ok(StatusReply {
            status,
            dt: buf.get_u32(),
        })
    }
}

/// Messages arriving as link packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SendFile(SendFileRequest),
    Chunk(DataChunk),
    Status(StatusReport),
}

impl Message {
    pub fn from_bytes(bytes: Bytes) -> Result<Self, WireError> {
        match bytes.first() {
            None => Err(WireError::Empty),
            Some(&CMD_SEND_FILE) => Ok(Message::SendFile(SendFileRequest::from_bytes(&bytes)?)),
            Some(&CMD_DATA_CHUNK) => Ok(Message::Chunk(DataChunk::from_bytes(bytes)?)),
            Some(&CMD_STATUS) => Ok(Message::Status(StatusReport::from_bytes(&bytes)?)),
            Some(&other) => Err(WireError::UnknownCommand(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_defers_to_nonzero() {
        let sender = TransferParams::new(250, 7, 10);
        let receiver = TransferParams::new(0, 0, 20);
        assert_eq!(
            TransferParams::negotiate(&sender, &receiver),
            TransferParams::new(250, 7, 10)
        );
    }

    #[test]
    fn test_negotiation_picks_conservative() {
        let sender = TransferParams::new(100, 3, 50);
        let receiver = TransferParams::new(64, 9, 30);
        assert_eq!(
            TransferParams::negotiate(&sender, &receiver),
            TransferParams::new(64, 9, 30)
        );
    }

    #[test]
    fn test_negotiation_defaults_and_clamps() {
        let none = TransferParams::unspecified();
        assert_eq!(
            TransferParams::negotiate(&none, &none),
            TransferParams::default()
        );

        let big = TransferParams::new(u16::MAX, 40, 20);
        let agreed = TransferParams::negotiate(&big, &none);
        assert_eq!(agreed.mtu, MAX_MTU);
        assert_eq!(agreed.dt_min, 40);
        assert_eq!(agreed.dt_max, 40);
    }

    #[test]
    fn test_initial_dt() {
        assert_eq!(TransferParams::new(250, 7, 10).initial_dt(), 7);
        assert_eq!(TransferParams::new(250, 10, 30).initial_dt(), 15);
    }

    #[test]
    fn test_chunk_count() {
        let params = TransferParams::new(7, 1, 1);
        assert_eq!(params.chunk_count(0), 0);
        assert_eq!(params.chunk_count(7), 1);
        assert_eq!(params.chunk_count(8), 2);
        assert_eq!(params.chunk_count(32000), 4572);
    }

    #[test]
    fn test_request_layout() {
        let req = SendFileRequest {
            length: 0x0102_0304,
            params: TransferParams::new(250, 7, 10),
            name: Some("a.bin".to_string()),
        };
        let bytes = req.to_bytes();
        assert_eq!(bytes.len(), SEND_FILE_HEADER_SIZE + 5);
        assert_eq!(&bytes[..5], &[0x10, 1, 2, 3, 4]);
        assert_eq!(&bytes[5..7], &[0, 250]);
        assert_eq!(bytes[15], 5);
        assert_eq!(SendFileRequest::from_bytes(&bytes).unwrap(), req);
    }

    #[test]
    fn test_request_without_name() {
        let req = SendFileRequest {
            length: 10,
            params: TransferParams::unspecified(),
            name: None,
        };
        let decoded = SendFileRequest::from_bytes(&req.to_bytes()).unwrap();
        assert_eq!(decoded.name, None);
    }

    #[test]
    fn test_request_truncated_name() {
        let req = SendFileRequest {
            length: 10,
            params: TransferParams::default(),
            name: Some("file".to_string()),
        };
        let bytes = req.to_bytes();
        assert!(matches!(
            SendFileRequest::from_bytes(&bytes[..bytes.len() - 1]),
            Err(WireError::BadLength { .. })
        ));
    }

    #[test]
    fn test_reply_layout() {
        let reply = SendFileReply {
            status: TransferStatus::Ok,
            params: TransferParams::new(7, 1, 2),
            session: 0xBEEF,
        };
        let bytes = reply.to_bytes();
        assert_eq!(bytes.len(), SEND_FILE_REPLY_SIZE);
        assert_eq!(&bytes[12..], &[0xBE, 0xEF]);
        assert_eq!(SendFileReply::from_bytes(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_status_layout() {
        let report = StatusReport {
            session: 0x0102,
            status: TransferStatus::Finished,
            base: 5,
            mask: 0b101,
        };
        let bytes = report.to_bytes();
        assert_eq!(bytes.len(), STATUS_REPORT_SIZE);
        assert_eq!(&bytes[..4], &[0x12, 0x01, 0x02, 0x01]);
        assert_eq!(StatusReport::from_bytes(&bytes).unwrap(), report);

        let reply = StatusReply {
            status: TransferStatus::Ok,
            dt: 9,
        };
        let bytes = reply.to_bytes();
        assert_eq!(&bytes[..], &[0x12, 0, 0, 0, 0, 9]);
        assert_eq!(StatusReply::from_bytes(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_message_dispatch() {
        let chunk = DataChunk::encode(7, 42, b"payload").freeze();
        match Message::from_bytes(chunk).unwrap() {
            Message::Chunk(c) => {
                assert_eq!(c.session, 7);
                assert_eq!(c.index, 42);
                assert_eq!(&c.data[..], b"payload");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            Message::from_bytes(Bytes::from_static(&[0x33])),
            Err(WireError::UnknownCommand(0x33))
        );
        assert_eq!(Message::from_bytes(Bytes::new()), Err(WireError::Empty));
        assert!(matches!(
            StatusReply::from_bytes(&[0x12, 7, 0, 0, 0, 1]),
            Err(WireError::BadStatus(7))
        ));
    }

    #[test]
    fn test_long_name_cut_on_char_boundary() {
        // 127 two-byte chars: byte 255 falls inside the last one
        let name = "é".repeat(128);
        let request = SendFileRequest {
            length: 1,
            params: TransferParams::default(),
            name: Some(name),
        };
        let bytes = request.to_bytes();
        assert_eq!(bytes[SEND_FILE_HEADER_SIZE - 1], 254);

        let parsed = SendFileRequest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.name, Some("é".repeat(127)));
    }
}

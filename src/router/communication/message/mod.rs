//! Wire format for the peer session protocol: a fixed 17-byte header
//! followed by an opaque body, and the command codes that select a
//! dispatcher handler.

use byteorder::{ByteOrder, LittleEndian};

use crate::router::error::*;

/// A header precedes every frame on the wire. 17 bytes, little-endian:
/// `u64 length | u64 seqno | u8 command`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub length: u64,
    pub seqno: u64,
    pub command: u8,
}

impl FrameHeader {
    /// The size, in bytes, of a serialized `FrameHeader`.
    pub const LENGTH: usize = 17;

    pub fn new(length: u64, seqno: u64, command: u8) -> Self {
        Self { length, seqno, command }
    }

    /// Serializes this header into `buf`, which must be at least
    /// `FrameHeader::LENGTH` bytes long.
    pub fn serialize_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < Self::LENGTH {
            return Err("buffer is too short to hold a frame header")
                .wrapped(ErrorKind::CommunicationMessage);
        }
        LittleEndian::write_u64(&mut buf[0..8], self.length);
        LittleEndian::write_u64(&mut buf[8..16], self.seqno);
        buf[16] = self.command;
        Ok(())
    }

    /// Deserializes a header from `buf`, which must be at least
    /// `FrameHeader::LENGTH` bytes long.
    pub fn deserialize_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LENGTH {
            return Err("buffer is too short to hold a frame header")
                .wrapped(ErrorKind::CommunicationMessage);
        }
        Ok(Self {
            length: LittleEndian::read_u64(&buf[0..8]),
            seqno: LittleEndian::read_u64(&buf[8..16]),
            command: buf[16],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        self.serialize_into(&mut buf[..]).unwrap();
        buf
    }
}

/// A fully assembled frame: a header plus its body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(seqno: u64, command: Command, body: Vec<u8>) -> Self {
        let header = FrameHeader::new(body.len() as u64, seqno, command as u8);
        Self { header, body }
    }
}

/// Command codes that select a handler in the session dispatcher.
///
/// Codes 0, 2, 3 and 4 are reserved and never appear as a valid inbound
/// command; they fall through to the same "unknown command" handling as
/// any other unrecognized byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Command {
    /// C→S: an encoded message (publish/persist/subscribe/tap/
    /// unsubscribe/query/tap-query/list), selected by the message's own
    /// type field.
    Message = 1,
    /// S→C: empty body, terminates a streaming response for a seqno.
    End = 5,
    /// S→C: `u16 code | UTF-8 reason`.
    Status = 6,
    /// S→C: `u16 code | u64 mid | u64 sig`, exactly 18 bytes.
    SubscriptionAck = 7,
    /// S→C: an encoded message, or raw URI bytes for `list`.
    Result = 8,
}

impl Command {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Command::Message),
            5 => Some(Command::End),
            6 => Some(Command::Status),
            7 => Some(Command::SubscriptionAck),
            8 => Some(Command::Result),
            _ => None,
        }
    }
}

/// Status codes reported in-band for semantic (non-transport) errors, and
/// for the `Okay` acknowledgement of well-formed requests.
///
/// Any code the injected `Verifier` surfaces for a failed `Message::verify`
/// call is passed through as-is in `StatusCode::Verifier`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StatusCode {
    Okay,
    MalformedMessage,
    AffinityMismatch,
    UnsubscribeError,
    BadOperation,
    Verifier(u16),
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Okay => 0,
            StatusCode::MalformedMessage => 1,
            StatusCode::AffinityMismatch => 2,
            StatusCode::UnsubscribeError => 3,
            StatusCode::BadOperation => 4,
            StatusCode::Verifier(code) => code,
        }
    }
}

/// Encodes a `Status` frame body: `u16 code | UTF-8 reason`.
pub fn status_body(code: StatusCode, reason: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + reason.len());
    body.extend_from_slice(&code.code().to_le_bytes());
    body.extend_from_slice(reason.as_bytes());
    body
}

/// Encodes a `SubscriptionAck` frame body: `u16 code | u64 mid | u64 sig`.
pub fn subscription_ack_body(code: StatusCode, mid: u64, sig: u64) -> Vec<u8> {
    let mut body = Vec::with_capacity(18);
    body.extend_from_slice(&code.code().to_le_bytes());
    body.extend_from_slice(&mid.to_le_bytes());
    body.extend_from_slice(&sig.to_le_bytes());
    body
}

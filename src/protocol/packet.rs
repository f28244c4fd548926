/* ----------------------------------------------------------------------------------------------
 *   Wire format (Source RCON, little-endian)
 *   ┌────────────┬───────────────┬──────────────┬───────────────────┬──────┬──────┐
 *   │ Size(4)    │ RequestId(4)  │ Type(4)      │ Body[Size-10]     │ 0x00 │ 0x00 │
 *   └────────────┴───────────────┴──────────────┴───────────────────┴──────┴──────┘
 *   Size counts every byte after itself, so the minimum legal value is 10
 *   (empty body). Both trailing zero bytes are mandatory and verified.
 * ------------------------------------------------------------------------------------------- */

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub(crate) const SIZE_FIELD_LEN: usize = 4;
pub(crate) const REQUEST_ID_LEN: usize = 4;
pub(crate) const TYPE_LEN: usize = 4;
pub(crate) const TERMINATOR_LEN: usize = 2;

/// Smallest legal value of the size field: id + type + two terminators.
pub(crate) const MIN_PAYLOAD_LEN: usize = REQUEST_ID_LEN + TYPE_LEN + TERMINATOR_LEN;

/// Smallest complete frame on the wire (size field + empty payload).
pub const MIN_FRAME_LEN: usize = SIZE_FIELD_LEN + MIN_PAYLOAD_LEN;

// Wire type codes. AUTH_RESPONSE and EXECCOMMAND share code 2 and are
// disambiguated by direction: 2 from a client is a command, 2 to a client
// is an auth response.
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_AUTH: i32 = 3;

/// One RCON protocol message.
///
/// `packet_type` keeps the raw wire code because the code space is not
/// injective across directions; [`Packet::client_kind`] gives the tagged
/// view of a frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Client-chosen correlation id, echoed verbatim on responses.
    pub request_id: i32,
    /// Raw wire type code.
    pub packet_type: i32,
    /// UTF-8 body; may be empty and may contain interior NUL bytes.
    pub body: String,
}

/// Direction-aware view of a packet received from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPacket {
    Auth,
    ExecCommand,
    ResponseValue,
    Unknown(i32),
}

impl Packet {
    pub fn new(request_id: i32, packet_type: i32, body: impl Into<String>) -> Self {
        Self {
            request_id,
            packet_type,
            body: body.into(),
        }
    }

    /// Auth reply: body `"1"` on success, `"-1"` on failure.
    pub fn auth_response(request_id: i32, success: bool) -> Self {
        Self::new(
            request_id,
            SERVERDATA_AUTH_RESPONSE,
            if success { "1" } else { "-1" },
        )
    }

    /// Command output reply.
    pub fn command_response(request_id: i32, body: impl Into<String>) -> Self {
        Self::new(request_id, SERVERDATA_RESPONSE_VALUE, body)
    }

    /// Classify an inbound frame by its wire code.
    pub fn client_kind(&self) -> ClientPacket {
        match self.packet_type {
            SERVERDATA_AUTH => ClientPacket::Auth,
            SERVERDATA_EXECCOMMAND => ClientPacket::ExecCommand,
            SERVERDATA_RESPONSE_VALUE => ClientPacket::ResponseValue,
            other => ClientPacket::Unknown(other),
        }
    }

    /// Encode to wire form, or fail if the frame would exceed `max_frame_size`.
    ///
    /// A frame is never truncated: on [`FrameViolation::TooLarge`] the
    /// caller must report an internal error instead of shipping a partial
    /// frame.
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, FrameViolation> {
        let body = self.body.as_bytes();
        let payload_len = MIN_PAYLOAD_LEN + body.len();
        let total = SIZE_FIELD_LEN + payload_len;
        if total > max_frame_size {
            return Err(FrameViolation::TooLarge(total));
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_i32_le(payload_len as i32);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.packet_type);
        buf.put_slice(body);
        buf.put_u8(0);
        buf.put_u8(0);
        Ok(buf.freeze())
    }
}

/// Reasons a frame is rejected. Every decode violation is unrecoverable
/// for the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameViolation {
    /// Size field below the 10-byte minimum (covers negative values).
    SizeTooSmall(i32),
    /// Size field would overflow when added to the header length.
    SizeOverflow(i32),
    /// Declared frame exceeds the configured frame limit.
    SizeTooLarge(i32),
    /// One or both trailing zero bytes are missing.
    MissingTerminator,
    /// Body is not valid UTF-8.
    InvalidBody,
    /// Encode-side: the frame to emit exceeds the configured frame limit.
    TooLarge(usize),
}

impl fmt::Display for FrameViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeTooSmall(size) => write!(f, "declared size {size} below minimum"),
            Self::SizeOverflow(size) => write!(f, "declared size {size} overflows frame length"),
            Self::SizeTooLarge(size) => write!(f, "declared size {size} exceeds frame limit"),
            Self::MissingTerminator => write!(f, "missing null terminators"),
            Self::InvalidBody => write!(f, "body is not valid UTF-8"),
            Self::TooLarge(total) => write!(f, "encoded frame of {total} bytes exceeds frame limit"),
        }
    }
}

/// Outcome of one decode attempt against the front of a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete frame was consumed from the buffer.
    Frame(Packet),
    /// Not enough bytes yet; `n` more are needed. The buffer is untouched.
    NeedMore(usize),
    /// Malformed input. The connection must be closed.
    Invalid(FrameViolation),
}

/// Try to decode exactly one complete frame from the front of `buf`,
/// consuming it on success.
///
/// All size validation happens before any allocation, in order: minimum,
/// explicit overflow guard, frame limit. A buffer whose declared size
/// exceeds the limit is invalid regardless of how many bytes follow.
pub fn try_decode_one(buf: &mut BytesMut, max_frame_size: usize) -> DecodeOutcome {
    if buf.len() < SIZE_FIELD_LEN {
        return DecodeOutcome::NeedMore(SIZE_FIELD_LEN - buf.len());
    }

    let size = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size < MIN_PAYLOAD_LEN as i32 {
        return DecodeOutcome::Invalid(FrameViolation::SizeTooSmall(size));
    }
    if size > i32::MAX - SIZE_FIELD_LEN as i32 {
        return DecodeOutcome::Invalid(FrameViolation::SizeOverflow(size));
    }

    let total = SIZE_FIELD_LEN + size as usize;
    if total > max_frame_size {
        return DecodeOutcome::Invalid(FrameViolation::SizeTooLarge(size));
    }
    if buf.len() < total {
        return DecodeOutcome::NeedMore(total - buf.len());
    }

    if buf[total - 2] != 0 || buf[total - 1] != 0 {
        return DecodeOutcome::Invalid(FrameViolation::MissingTerminator);
    }

    let request_id = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let packet_type = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

    let body_end = total - TERMINATOR_LEN;
    let body = match std::str::from_utf8(&buf[SIZE_FIELD_LEN + REQUEST_ID_LEN + TYPE_LEN..body_end])
    {
        Ok(body) => body.to_string(),
        Err(_) => return DecodeOutcome::Invalid(FrameViolation::InvalidBody),
    };

    buf.advance(total);

    DecodeOutcome::Frame(Packet {
        request_id,
        packet_type,
        body,
    })
}

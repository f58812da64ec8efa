//! Binary codec for MixDeck sync messages.
//!
//! Payload format (the bytes inside one frame):
//! ```text
//! [MSG_TYPE:1][MSG_ID:2][type-specific fields]
//! ```
//!
//! Type-specific fields, all multi-byte integers big-endian:
//!
//! | Message          | Fields                                             |
//! |------------------|----------------------------------------------------|
//! | `FullSnapshot`   | `count:1` then `count` × session                   |
//! | `Delta`/`Intent` | `id:4` `field:1` `value:2 (signed)`                |
//! | `MediaKey`       | `usage:2`                                          |
//! | `Ack`            | `msg_id:2`                                         |
//! | `Nack`           | `msg_id:2` `reason:1`                              |
//! | `Hello`          | `protocol_version:1`                               |
//! | `SessionAdded`   | session                                            |
//! | `SessionRemoved` | `id:4`                                             |
//! | `Heartbeat`      | (empty)                                            |
//!
//! A session is `id:4` `volume:1` `muted:1` `name_len:1` `name:name_len`
//! (UTF-8).

use thiserror::Error;

use crate::domain::session::{Field, FieldChange, Session, SessionId};
use crate::hid::consumer::MediaKey;
use crate::protocol::framing::{encode_frame, FramingError, MAX_PAYLOAD_LEN};
use crate::protocol::messages::{
    Envelope, MessageType, NackReason, SyncMessage, PAYLOAD_HEADER_SIZE,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload is shorter than the fixed header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// A field value could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Bytes were left over after the message was fully decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// The encoded message does not fit in one frame.
    #[error(transparent)]
    Framing(#[from] FramingError),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into a frame payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] when a snapshot holds more than
/// 255 sessions, or [`ProtocolError::Framing`] when the payload exceeds
/// [`MAX_PAYLOAD_LEN`].
///
/// # Examples
///
/// ```rust
/// use mixdeck_core::protocol::codec::{decode_message, encode_message};
/// use mixdeck_core::protocol::messages::{Envelope, SyncMessage};
///
/// let env = Envelope::new(7, SyncMessage::Ack { msg_id: 3 });
/// let bytes = encode_message(&env).unwrap();
/// assert_eq!(decode_message(&bytes).unwrap(), env);
/// ```
pub fn encode_message(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(16);
    buf.push(envelope.message.message_type() as u8);
    buf.extend_from_slice(&envelope.msg_id.to_be_bytes());
    encode_body(&mut buf, &envelope.message)?;
    if buf.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge(buf.len()).into());
    }
    Ok(buf)
}

/// Decodes one [`Envelope`] from a complete frame payload.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or not fully consumed.
pub fn decode_message(payload: &[u8]) -> Result<Envelope, ProtocolError> {
    if payload.len() < PAYLOAD_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: PAYLOAD_HEADER_SIZE,
            available: payload.len(),
        });
    }
    let type_byte = payload[0];
    let msg_type =
        MessageType::try_from(type_byte).map_err(|_| ProtocolError::UnknownMessageType(type_byte))?;
    let msg_id = u16::from_be_bytes([payload[1], payload[2]]);

    let mut reader = Reader::new(&payload[PAYLOAD_HEADER_SIZE..]);
    let message = decode_body(msg_type, &mut reader)?;
    if reader.remaining() > 0 {
        return Err(ProtocolError::TrailingBytes(reader.remaining()));
    }
    Ok(Envelope { msg_id, message })
}

/// Encodes an envelope and wraps it in a frame, ready for the wire.
///
/// # Errors
///
/// Propagates encoding and framing errors.
pub fn encode_framed(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_message(envelope)?;
    Ok(encode_frame(&payload)?)
}

/// Number of bytes `session` occupies inside a snapshot.
pub fn encoded_session_len(session: &Session) -> usize {
    4 + 1 + 1 + 1 + session.name.len().min(u8::MAX as usize)
}

/// Returns the longest prefix of `sessions` whose `FullSnapshot` fits in one
/// frame.
pub fn fit_snapshot(sessions: &[Session]) -> &[Session] {
    // header + count byte
    let mut used = PAYLOAD_HEADER_SIZE + 1;
    let mut n = 0;
    for session in sessions.iter().take(u8::MAX as usize) {
        used += encoded_session_len(session);
        if used > MAX_PAYLOAD_LEN {
            break;
        }
        n += 1;
    }
    &sessions[..n]
}

// ── Body encoding ─────────────────────────────────────────────────────────────

fn encode_body(buf: &mut Vec<u8>, msg: &SyncMessage) -> Result<(), ProtocolError> {
    match msg {
        SyncMessage::FullSnapshot(sessions) => {
            let count = u8::try_from(sessions.len()).map_err(|_| {
                ProtocolError::MalformedPayload(format!(
                    "snapshot of {} sessions exceeds 255",
                    sessions.len()
                ))
            })?;
            buf.push(count);
            for session in sessions {
                encode_session(buf, session);
            }
        }
        SyncMessage::Delta { id, change } | SyncMessage::Intent { id, change } => {
            encode_change(buf, *id, *change);
        }
        SyncMessage::MediaKey(key) => buf.extend_from_slice(&key.usage().to_be_bytes()),
        SyncMessage::Ack { msg_id } => buf.extend_from_slice(&msg_id.to_be_bytes()),
        SyncMessage::Nack { msg_id, reason } => {
            buf.extend_from_slice(&msg_id.to_be_bytes());
            buf.push(*reason as u8);
        }
        SyncMessage::Hello { protocol_version } => buf.push(*protocol_version),
        SyncMessage::SessionAdded(session) => encode_session(buf, session),
        SyncMessage::SessionRemoved(id) => buf.extend_from_slice(&id.0.to_be_bytes()),
        SyncMessage::Heartbeat => {} // empty payload
    }
    Ok(())
}

fn encode_session(buf: &mut Vec<u8>, s: &Session) {
    buf.extend_from_slice(&s.id.0.to_be_bytes());
    buf.push(s.volume);
    buf.push(u8::from(s.muted));
    write_short_string(buf, &s.name);
}

fn encode_change(buf: &mut Vec<u8>, id: SessionId, change: FieldChange) {
    let (field, value) = change.to_wire();
    buf.extend_from_slice(&id.0.to_be_bytes());
    buf.push(field as u8);
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Writes a 1-byte length prefix followed by at most 255 UTF-8 bytes,
/// cutting on a character boundary.
fn write_short_string(buf: &mut Vec<u8>, s: &str) {
    let mut end = s.len().min(u8::MAX as usize);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.push(end as u8);
    buf.extend_from_slice(&s.as_bytes()[..end]);
}

// ── Body decoding ─────────────────────────────────────────────────────────────

fn decode_body(msg_type: MessageType, r: &mut Reader<'_>) -> Result<SyncMessage, ProtocolError> {
    Ok(match msg_type {
        MessageType::FullSnapshot => {
            let count = r.u8("FullSnapshot.count")?;
            let sessions = (0..count)
                .map(|_| decode_session(r))
                .collect::<Result<Vec<_>, _>>()?;
            SyncMessage::FullSnapshot(sessions)
        }
        MessageType::Delta => {
            let (id, change) = decode_change(r)?;
            SyncMessage::Delta { id, change }
        }
        MessageType::Intent => {
            let (id, change) = decode_change(r)?;
            SyncMessage::Intent { id, change }
        }
        MessageType::MediaKey => {
            let usage = r.u16("MediaKey.usage")?;
            let key = MediaKey::from_usage(usage).ok_or_else(|| {
                ProtocolError::MalformedPayload(format!("unknown media usage: 0x{usage:04X}"))
            })?;
            SyncMessage::MediaKey(key)
        }
        MessageType::Ack => SyncMessage::Ack {
            msg_id: r.u16("Ack.msg_id")?,
        },
        MessageType::Nack => {
            let msg_id = r.u16("Nack.msg_id")?;
            let code = r.u8("Nack.reason")?;
            let reason = NackReason::try_from(code).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown nack reason: {code}"))
            })?;
            SyncMessage::Nack { msg_id, reason }
        }
        MessageType::Hello => SyncMessage::Hello {
            protocol_version: r.u8("Hello.protocol_version")?,
        },
        MessageType::SessionAdded => SyncMessage::SessionAdded(decode_session(r)?),
        MessageType::SessionRemoved => {
            SyncMessage::SessionRemoved(SessionId(r.u32("SessionRemoved.id")?))
        }
        MessageType::Heartbeat => SyncMessage::Heartbeat,
    })
}

fn decode_session(r: &mut Reader<'_>) -> Result<Session, ProtocolError> {
    let id = SessionId(r.u32("Session.id")?);
    let volume = r.u8("Session.volume")?;
    let muted = r.u8("Session.muted")? != 0;
    let name = r.short_string("Session.name")?;
    // Re-apply the clamp law and name budget: the wire is not trusted.
    Ok(Session::new(id, &name, i32::from(volume), muted))
}

fn decode_change(r: &mut Reader<'_>) -> Result<(SessionId, FieldChange), ProtocolError> {
    let id = SessionId(r.u32("change.id")?);
    let code = r.u8("change.field")?;
    let field = Field::try_from(code)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown field code: {code}")))?;
    let value = r.i16("change.value")?;
    Ok((id, FieldChange::from_wire(field, value)))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Cursor over a payload body that reports short reads as `MalformedPayload`.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, context: &str) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::MalformedPayload(format!(
                "{context}: need {n} bytes, got {}",
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self, context: &str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, context)?[0])
    }

    fn u16(&mut self, context: &str) -> Result<u16, ProtocolError> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i16(&mut self, context: &str) -> Result<i16, ProtocolError> {
        let b = self.take(2, context)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, context: &str) -> Result<u32, ProtocolError> {
        let b = self.take(4, context)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn short_string(&mut self, context: &str) -> Result<String, ProtocolError> {
        let len = self.u8(context)? as usize;
        let bytes = self.take(len, context)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| ProtocolError::MalformedPayload(format!("{context}: invalid UTF-8: {e}")))
    }
}

//! All MixDeck sync protocol message types.
//!
//! Every message travels inside an [`Envelope`] that carries its `msg_id`.
//! Ids are scoped per direction: the host→device and device→host counters
//! are independent.

use serde::{Deserialize, Serialize};

use crate::domain::session::{FieldChange, Session, SessionId};
use crate::hid::consumer::MediaKey;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version, carried in `Hello`.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the common payload header: `[MSG_TYPE:1][MSG_ID:2]`.
pub const PAYLOAD_HEADER_SIZE: usize = 3;

// ── Message type codes ────────────────────────────────────────────────────────

/// Wire code of each message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Sync traffic (0x01–0x0F)
    FullSnapshot = 0x01,
    Delta = 0x02,
    Intent = 0x03,
    MediaKey = 0x04,
    Ack = 0x05,
    Nack = 0x06,
    // Link management (0x10–0x1F)
    Hello = 0x10,
    SessionAdded = 0x11,
    SessionRemoved = 0x12,
    Heartbeat = 0x13,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::FullSnapshot),
            0x02 => Ok(MessageType::Delta),
            0x03 => Ok(MessageType::Intent),
            0x04 => Ok(MessageType::MediaKey),
            0x05 => Ok(MessageType::Ack),
            0x06 => Ok(MessageType::Nack),
            0x10 => Ok(MessageType::Hello),
            0x11 => Ok(MessageType::SessionAdded),
            0x12 => Ok(MessageType::SessionRemoved),
            0x13 => Ok(MessageType::Heartbeat),
            _ => Err(()),
        }
    }
}

// ── Nack reasons ──────────────────────────────────────────────────────────────

/// Why a reliable message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NackReason {
    /// The referenced session no longer exists (process exited mid-flight).
    UnknownSession = 0x01,
    /// The field code is not understood by the receiver.
    InvalidField = 0x02,
    /// The message could not be applied for another reason.
    Rejected = 0x03,
}

impl TryFrom<u8> for NackReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(NackReason::UnknownSession),
            0x02 => Ok(NackReason::InvalidField),
            0x03 => Ok(NackReason::Rejected),
            _ => Err(()),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Host → device: the whole registry in first-observed order.
    FullSnapshot(Vec<Session>),
    /// Host → device: one field of one session changed.
    Delta { id: SessionId, change: FieldChange },
    /// Device → host: request to change one field of one session.
    Intent { id: SessionId, change: FieldChange },
    /// Device → host: a media key was sent over HID (informational).
    MediaKey(MediaKey),
    /// Positive acknowledgement of the reliable message `msg_id`.
    Ack { msg_id: u16 },
    /// Negative acknowledgement of the reliable message `msg_id`.
    Nack { msg_id: u16, reason: NackReason },
    /// Device → host: open (or reopen) the handshake.
    Hello { protocol_version: u8 },
    /// Host → device: a newly observed session.
    SessionAdded(Session),
    /// Host → device: a session's process exited.
    SessionRemoved(SessionId),
    /// Either direction: keep-alive sent when the link is otherwise idle.
    Heartbeat,
}

impl SyncMessage {
    /// Returns the wire type code for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::FullSnapshot(_) => MessageType::FullSnapshot,
            SyncMessage::Delta { .. } => MessageType::Delta,
            SyncMessage::Intent { .. } => MessageType::Intent,
            SyncMessage::MediaKey(_) => MessageType::MediaKey,
            SyncMessage::Ack { .. } => MessageType::Ack,
            SyncMessage::Nack { .. } => MessageType::Nack,
            SyncMessage::Hello { .. } => MessageType::Hello,
            SyncMessage::SessionAdded(_) => MessageType::SessionAdded,
            SyncMessage::SessionRemoved(_) => MessageType::SessionRemoved,
            SyncMessage::Heartbeat => MessageType::Heartbeat,
        }
    }

    /// Returns `true` for messages that consume a fresh `msg_id` and expect
    /// an `Ack`/`Nack`.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            SyncMessage::FullSnapshot(_)
                | SyncMessage::Delta { .. }
                | SyncMessage::Intent { .. }
                | SyncMessage::Hello { .. }
                | SyncMessage::SessionAdded(_)
                | SyncMessage::SessionRemoved(_)
        )
    }
}

/// A message together with its per-direction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_id: u16,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn new(msg_id: u16, message: SyncMessage) -> Self {
        Self { msg_id, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_try_from_roundtrip() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x10, 0x11, 0x12, 0x13] {
            let ty = MessageType::try_from(code).unwrap();
            assert_eq!(ty as u8, code);
        }
        assert!(MessageType::try_from(0x00).is_err());
        assert!(MessageType::try_from(0xFF).is_err());
    }

    #[test]
    fn test_control_messages_are_not_reliable() {
        assert!(!SyncMessage::Ack { msg_id: 1 }.is_reliable());
        assert!(!SyncMessage::Nack {
            msg_id: 1,
            reason: NackReason::Rejected
        }
        .is_reliable());
        assert!(!SyncMessage::Heartbeat.is_reliable());
        assert!(!SyncMessage::MediaKey(MediaKey::Mute).is_reliable());
    }

    #[test]
    fn test_sync_traffic_is_reliable() {
        let id = SessionId(1);
        assert!(SyncMessage::FullSnapshot(vec![]).is_reliable());
        assert!(SyncMessage::Delta {
            id,
            change: FieldChange::Volume(1)
        }
        .is_reliable());
        assert!(SyncMessage::Intent {
            id,
            change: FieldChange::Muted(true)
        }
        .is_reliable());
        assert!(SyncMessage::SessionRemoved(id).is_reliable());
        assert!(SyncMessage::Hello {
            protocol_version: PROTOCOL_VERSION
        }
        .is_reliable());
    }
}

//! Byte-stream framing for the serial link.
//!
//! # Why frame at all? (for beginners)
//!
//! A serial port delivers an endless stream of bytes with no notion of where
//! one message ends and the next begins.  Bytes can also be lost or flipped
//! when a cable is jiggled or the device reboots mid-transfer.  Framing wraps
//! every payload in a small envelope so the receiver can find message
//! boundaries and detect corruption:
//!
//! ```text
//! [START:1 = 0x7E] stuffed([LEN:2 BE][PAYLOAD:LEN][CHECKSUM:1]) [END:1 = 0x7F]
//! ```
//!
//! `CHECKSUM` is the sum (mod 256) of the two `LEN` bytes and every payload
//! byte.
//!
//! # Byte stuffing
//!
//! Inside a frame, any byte equal to START, END or ESC (`0x7D`) is sent as
//! `ESC, byte ^ 0x20`.  START and END therefore only ever appear on the wire
//! as frame boundaries, which is what makes recovery cheap.
//!
//! # Recovery
//!
//! [`FrameDecoder`] never gives up on a stream.  A START always opens a new
//! frame, dropping whatever partial frame was in progress.  A frame whose
//! declared length disagrees with what arrived before END, whose checksum is
//! wrong, or which carries an invalid escape is discarded at END.  A
//! corrupted length therefore costs exactly one frame and never holds back
//! the frames that follow it.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

/// Frame start marker.
pub const FRAME_START: u8 = 0x7E;
/// Frame end marker.
pub const FRAME_END: u8 = 0x7F;
/// Escape marker for stuffed bytes.
pub const FRAME_ESC: u8 = 0x7D;
/// XOR applied to a byte following [`FRAME_ESC`].
pub const ESC_XOR: u8 = 0x20;
/// Largest payload accepted on the wire; matches the device's serial buffer.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// START + LEN(2) + CHECKSUM + END, before stuffing.
pub const FRAME_OVERHEAD: usize = 5;

/// LEN(2) + CHECKSUM: the unstuffed frame body around the payload.
const BODY_OVERHEAD: usize = 3;
const MAX_BODY_LEN: usize = MAX_PAYLOAD_LEN + BODY_OVERHEAD;

/// Errors produced while building or validating a single frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("payload of {0} bytes exceeds the {max}-byte limit", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),

    #[error("empty payload")]
    EmptyPayload,

    #[error("frame does not begin with the start marker (got 0x{0:02X})")]
    MissingStartMarker(u8),

    #[error("declared length {0} is out of range")]
    BadLength(usize),

    #[error("declared length {declared} but {actual} payload bytes arrived")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: frame says 0x{expected:02X}, computed 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("invalid escape sequence 0x7D 0x{0:02X}")]
    BadEscape(u8),

    #[error("frame interrupted by a new start marker after {0} bytes")]
    Interrupted(usize),

    #[error("frame ran past {max} bytes without an end marker", max = MAX_BODY_LEN)]
    Overrun,

    #[error("incomplete frame: no end marker in {available} bytes")]
    Incomplete { available: usize },
}

/// Sum (mod 256) over the length bytes and the payload.
pub fn checksum(len_bytes: [u8; 2], payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(len_bytes[0].wrapping_add(len_bytes[1]), |acc, b| acc.wrapping_add(*b))
}

fn is_marker(byte: u8) -> bool {
    matches!(byte, FRAME_START | FRAME_END | FRAME_ESC)
}

fn stuff_into(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if is_marker(b) {
            out.push(FRAME_ESC);
            out.push(b ^ ESC_XOR);
        } else {
            out.push(b);
        }
    }
}

/// Wraps `payload` in a frame.
///
/// # Errors
///
/// Returns [`FramingError::EmptyPayload`] or [`FramingError::PayloadTooLarge`]
/// when the payload cannot be represented on the wire.
///
/// # Examples
///
/// ```rust
/// use mixdeck_core::protocol::framing::{decode_frame, encode_frame};
///
/// let frame = encode_frame(&[0x05, 0x7E, 0x01]).unwrap();
/// let (payload, consumed) = decode_frame(&frame).unwrap();
/// assert_eq!(payload, vec![0x05, 0x7E, 0x01]);
/// assert_eq!(consumed, frame.len());
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.is_empty() {
        return Err(FramingError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge(payload.len()));
    }
    let len_bytes = (payload.len() as u16).to_be_bytes();

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD + 4);
    frame.push(FRAME_START);
    stuff_into(&mut frame, &len_bytes);
    stuff_into(&mut frame, payload);
    stuff_into(&mut frame, &[checksum(len_bytes, payload)]);
    frame.push(FRAME_END);
    Ok(frame)
}

/// Validates one frame at the very beginning of `bytes`.
///
/// Returns the payload and the number of wire bytes the frame occupies.
///
/// # Errors
///
/// Returns the first [`FramingError`] found.  `Incomplete` means no END
/// marker has arrived yet.
pub fn decode_frame(bytes: &[u8]) -> Result<(Vec<u8>, usize), FramingError> {
    match bytes.first() {
        Some(&FRAME_START) => {}
        Some(&other) => return Err(FramingError::MissingStartMarker(other)),
        None => return Err(FramingError::Incomplete { available: 0 }),
    }
    let mut rx = Receiver::default();
    for (i, &byte) in bytes.iter().enumerate() {
        match rx.push(byte) {
            Rx::Pending | Rx::Skipped => {}
            Rx::Frame(payload) => return Ok((payload, i + 1)),
            Rx::Rejected(err) => return Err(err),
        }
    }
    Err(FramingError::Incomplete {
        available: bytes.len(),
    })
}

/// Checks an unstuffed `[LEN:2][PAYLOAD][CHECKSUM]` body.
fn check_body(body: &[u8]) -> Result<Vec<u8>, FramingError> {
    if body.len() < BODY_OVERHEAD {
        return Err(FramingError::BadLength(body.len().saturating_sub(BODY_OVERHEAD)));
    }
    let len_bytes = [body[0], body[1]];
    let declared = u16::from_be_bytes(len_bytes) as usize;
    if declared == 0 || declared > MAX_PAYLOAD_LEN {
        return Err(FramingError::BadLength(declared));
    }
    let actual = body.len() - BODY_OVERHEAD;
    if declared != actual {
        return Err(FramingError::LengthMismatch { declared, actual });
    }
    let payload = &body[2..2 + actual];
    let expected = body[body.len() - 1];
    let computed = checksum(len_bytes, payload);
    if expected != computed {
        return Err(FramingError::ChecksumMismatch {
            expected,
            actual: computed,
        });
    }
    Ok(payload.to_vec())
}

// ── Receiver state machine ────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Outside a frame, waiting for START.
    #[default]
    Hunting,
    InFrame,
    /// The previous byte was ESC.
    Escaped,
}

/// What one received byte produced.
#[derive(Debug)]
enum Rx {
    Pending,
    /// Noise outside any frame.
    Skipped,
    Frame(Vec<u8>),
    Rejected(FramingError),
}

#[derive(Debug, Default)]
struct Receiver {
    state: RxState,
    body: Vec<u8>,
}

impl Receiver {
    fn push(&mut self, byte: u8) -> Rx {
        if byte == FRAME_START {
            let interrupted = self.state != RxState::Hunting;
            let dropped = self.body.len();
            self.body.clear();
            self.state = RxState::InFrame;
            return if interrupted {
                Rx::Rejected(FramingError::Interrupted(dropped))
            } else {
                Rx::Pending
            };
        }
        match self.state {
            RxState::Hunting => Rx::Skipped,
            RxState::InFrame if byte == FRAME_END => {
                let result = check_body(&self.body);
                self.abandon();
                match result {
                    Ok(payload) => Rx::Frame(payload),
                    Err(err) => Rx::Rejected(err),
                }
            }
            RxState::InFrame if byte == FRAME_ESC => {
                self.state = RxState::Escaped;
                Rx::Pending
            }
            RxState::InFrame => self.append(byte),
            RxState::Escaped => {
                let value = byte ^ ESC_XOR;
                if is_marker(value) {
                    self.state = RxState::InFrame;
                    self.append(value)
                } else {
                    self.abandon();
                    Rx::Rejected(FramingError::BadEscape(byte))
                }
            }
        }
    }

    fn append(&mut self, value: u8) -> Rx {
        if self.body.len() >= MAX_BODY_LEN {
            self.abandon();
            return Rx::Rejected(FramingError::Overrun);
        }
        self.body.push(value);
        Rx::Pending
    }

    fn abandon(&mut self) {
        self.body.clear();
        self.state = RxState::Hunting;
    }
}

// ── Streaming decoder ─────────────────────────────────────────────────────────

/// Counters describing what the decoder has seen since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    /// Out-of-range or mismatched lengths, and overruns.
    pub bad_length: u64,
    pub checksum_errors: u64,
    pub bad_escapes: u64,
    /// Partial frames cut short by a new START.
    pub interrupted: u64,
    /// Bytes skipped while hunting for a START marker.
    pub discarded_bytes: u64,
}

/// Incremental decoder that turns arbitrary byte chunks into payloads.
///
/// # Examples
///
/// ```rust
/// use mixdeck_core::protocol::framing::{encode_frame, FrameDecoder};
///
/// let frame = encode_frame(b"hello").unwrap();
/// let mut decoder = FrameDecoder::new();
///
/// // Bytes may arrive in any chunking, with line noise in front.
/// decoder.feed(&[0x00, 0x13]);
/// decoder.feed(&frame[..4]);
/// assert!(decoder.next_payload().is_none());
/// decoder.feed(&frame[4..]);
/// assert_eq!(decoder.next_payload().as_deref(), Some(&b"hello"[..]));
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    rx: Receiver,
    ready: VecDeque<Vec<u8>>,
    stats: FrameStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs received bytes through the receiver; completed payloads queue up
    /// for [`next_payload`](Self::next_payload).
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match self.rx.push(byte) {
                Rx::Pending => {}
                Rx::Skipped => self.stats.discarded_bytes += 1,
                Rx::Frame(payload) => {
                    self.stats.frames += 1;
                    self.ready.push_back(payload);
                }
                Rx::Rejected(err) => {
                    debug!("discarding corrupt frame: {err}");
                    match err {
                        FramingError::BadLength(_)
                        | FramingError::LengthMismatch { .. }
                        | FramingError::Overrun => self.stats.bad_length += 1,
                        FramingError::ChecksumMismatch { .. } => self.stats.checksum_errors += 1,
                        FramingError::BadEscape(_) => self.stats.bad_escapes += 1,
                        FramingError::Interrupted(_) => self.stats.interrupted += 1,
                        _ => {}
                    }
                }
            }
        }
    }

    /// Returns the next complete, valid payload, or `None` if more bytes are
    /// needed.
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Drains every payload currently decodable.
    pub fn drain(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        std::iter::from_fn(move || self.next_payload())
    }

    /// Discards the partial frame and any undelivered payloads (used on
    /// transport loss).
    pub fn reset(&mut self) {
        self.rx.abandon();
        self.ready.clear();
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Unstuffed bytes of the frame currently being received.
    pub fn buffered(&self) -> usize {
        self.rx.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack_frame(msg_id: u8) -> Vec<u8> {
        encode_frame(&[0x05, 0x00, msg_id, 0x00, msg_id]).unwrap()
    }

    #[test]
    fn test_encode_frame_layout() {
        // Arrange
        let payload = [0x01, 0x02, 0x03];

        // Act
        let frame = encode_frame(&payload).unwrap();

        // Assert
        assert_eq!(frame[0], FRAME_START);
        assert_eq!(&frame[1..3], &[0x00, 0x03]);
        assert_eq!(&frame[3..6], &payload);
        assert_eq!(frame[6], 0x03 + 0x01 + 0x02 + 0x03);
        assert_eq!(frame[7], FRAME_END);
        assert_eq!(frame.len(), payload.len() + FRAME_OVERHEAD);
    }

    #[test]
    fn test_markers_inside_a_frame_are_stuffed() {
        let frame = encode_frame(&[FRAME_START, FRAME_END, FRAME_ESC]).unwrap();

        assert_eq!(
            frame,
            vec![
                FRAME_START,
                0x00,
                0x03,
                FRAME_ESC,
                0x5E,
                FRAME_ESC,
                0x5F,
                FRAME_ESC,
                0x5D,
                // 0x03 + 0x7E + 0x7F + 0x7D = 0x7D, itself stuffed
                FRAME_ESC,
                0x5D,
                FRAME_END,
            ]
        );
        let inner = &frame[1..frame.len() - 1];
        assert!(!inner.contains(&FRAME_START));
        assert!(!inner.contains(&FRAME_END));
        assert_eq!(
            decode_frame(&frame).unwrap().0,
            vec![FRAME_START, FRAME_END, FRAME_ESC]
        );
    }

    #[test]
    fn test_encode_frame_rejects_empty_and_oversized_payloads() {
        assert_eq!(encode_frame(&[]), Err(FramingError::EmptyPayload));
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode_frame(&big),
            Err(FramingError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn test_encode_frame_accepts_max_payload() {
        let payload = vec![FRAME_START; MAX_PAYLOAD_LEN];
        let frame = encode_frame(&payload).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(n, frame.len());
    }

    #[test]
    fn test_checksum_wraps_mod_256() {
        let payload = [0xFF, 0xFF];
        assert_eq!(checksum([0x00, 0x02], &payload), 0x00);
    }

    #[test]
    fn test_decode_frame_detects_checksum_mismatch() {
        let mut frame = encode_frame(&[0x10, 0x20]).unwrap();
        frame[3] ^= 0x01;
        assert!(matches!(
            decode_frame(&frame),
            Err(FramingError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_frame_detects_length_mismatch() {
        let mut frame = encode_frame(&[0x10]).unwrap();
        frame[2] = 0x02;
        assert_eq!(
            decode_frame(&frame),
            Err(FramingError::LengthMismatch {
                declared: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_decode_frame_rejects_invalid_escape() {
        let frame = [FRAME_START, 0x00, 0x01, FRAME_ESC, 0x41, 0x42, FRAME_END];
        assert_eq!(decode_frame(&frame), Err(FramingError::BadEscape(0x41)));
    }

    #[test]
    fn test_decode_frame_reports_incomplete() {
        let frame = encode_frame(&[0x10, 0x11]).unwrap();
        assert_eq!(
            decode_frame(&frame[..4]),
            Err(FramingError::Incomplete { available: 4 })
        );
    }

    #[test]
    fn test_decoder_handles_byte_by_byte_feed() {
        // Arrange
        let frame = encode_frame(b"a~}c").unwrap();
        let mut decoder = FrameDecoder::new();

        // Act
        let mut out = Vec::new();
        for b in &frame {
            decoder.feed(&[*b]);
            out.extend(decoder.drain());
        }

        // Assert
        assert_eq!(out, vec![b"a~}c".to_vec()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_skips_leading_noise() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x00, 0x55, FRAME_END]);
        decoder.feed(&encode_frame(b"x").unwrap());

        assert_eq!(decoder.next_payload(), Some(b"x".to_vec()));
        assert_eq!(decoder.stats().discarded_bytes, 3);
    }

    #[test]
    fn test_decoder_recovers_after_corrupt_frame() {
        // Arrange – a corrupted frame followed by a good one
        let mut bad = encode_frame(b"first").unwrap();
        bad[4] ^= 0x01;
        let good = encode_frame(b"second").unwrap();
        let mut decoder = FrameDecoder::new();

        // Act
        decoder.feed(&bad);
        decoder.feed(&good);
        let payloads: Vec<_> = decoder.drain().collect();

        // Assert
        assert_eq!(payloads, vec![b"second".to_vec()]);
        assert_eq!(decoder.stats().checksum_errors, 1);
    }

    #[test]
    fn test_corrupted_length_does_not_hold_back_later_frames() {
        // Arrange – LEN 0x0005 damaged to 0x0305, still within range
        let mut bad = ack_frame(1);
        bad[1] = 0x03;
        let mut stream = bad;
        for id in 2..=55 {
            stream.extend(ack_frame(id));
        }
        let mut decoder = FrameDecoder::new();

        // Act
        decoder.feed(&stream);
        let payloads: Vec<_> = decoder.drain().collect();

        // Assert
        assert_eq!(payloads.len(), 54);
        assert_eq!(payloads[0], vec![0x05, 0x00, 2, 0x00, 2]);
        assert_eq!(decoder.stats().bad_length, 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_recovers_from_oversized_length() {
        let mut decoder = FrameDecoder::new();
        // START + LEN = 0xFFFF: can never be valid
        decoder.feed(&[FRAME_START, 0xFF, 0xFF, FRAME_END]);
        decoder.feed(&encode_frame(b"ok").unwrap());

        assert_eq!(decoder.next_payload(), Some(b"ok".to_vec()));
        assert_eq!(decoder.stats().bad_length, 1);
    }

    #[test]
    fn test_truncated_frame_is_dropped_at_next_start() {
        // A frame cut off mid-way (device reset) followed by a good one.
        let cut = encode_frame(b"lost").unwrap();
        let mut stream = cut[..4].to_vec();
        stream.extend(encode_frame(b"inner").unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&stream);

        assert_eq!(decoder.next_payload(), Some(b"inner".to_vec()));
        assert_eq!(decoder.stats().interrupted, 1);
    }

    #[test]
    fn test_runaway_frame_is_abandoned() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[FRAME_START]);
        decoder.feed(&vec![0x11; MAX_PAYLOAD_LEN + 8]);
        assert_eq!(decoder.stats().bad_length, 1);

        decoder.feed(&encode_frame(b"next").unwrap());
        assert_eq!(decoder.next_payload(), Some(b"next".to_vec()));
    }

    #[test]
    fn test_decoder_decodes_back_to_back_frames() {
        let mut decoder = FrameDecoder::new();
        let mut stream = encode_frame(b"one").unwrap();
        stream.extend(encode_frame(b"two").unwrap());
        decoder.feed(&stream);

        let payloads: Vec<_> = decoder.drain().collect();

        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(decoder.stats().frames, 2);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let frame = encode_frame(b"partial").unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame[..5]);

        decoder.reset();
        decoder.feed(&frame[5..]);

        assert!(decoder.next_payload().is_none());
        assert_eq!(decoder.buffered(), 0);
    }
}

//! # mixdeck-core
//!
//! Shared library for MixDeck containing the serial framing layer, the sync
//! protocol codec and engine, the audio-session domain types, and the HID
//! consumer-control usage table.
//!
//! This crate is used by both the host and the device applications.
//! It has zero dependencies on OS APIs, audio APIs, serial ports, or displays.
//!
//! # Architecture overview (for beginners)
//!
//! MixDeck turns a small touchscreen board into a per-application volume
//! mixer for a PC.  The PC (the "host") owns the real list of audio sessions
//! and their volumes; the board (the "device") keeps a lagging copy and lets
//! the user drag sliders or turn a rotary knob.
//!
//! This crate (`mixdeck-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the serial link.  Messages are
//!   encoded into a compact binary payload, wrapped in a checksummed frame, and
//!   decoded back into typed Rust values on the other end.
//!
//! - **`sync`** – The link state machine (`Disconnected → Handshaking →
//!   Synchronized → Resyncing`), Ack/retry bookkeeping, and in-order delivery.
//!
//! - **`domain`** – Pure data with no I/O: the `Session` entity, the
//!   volume clamp law, and the device-side `ShadowCache`.
//!
//! - **`hid`** – USB HID consumer-control usages (Volume Up/Down, Mute,
//!   Play/Pause, Next/Previous) used by the device's media-key bridge.

pub mod domain;
pub mod hid;
pub mod protocol;
pub mod sync;

// Re-export the most-used types at the crate root so callers can write
// `mixdeck_core::Session` instead of `mixdeck_core::domain::session::Session`.
pub use domain::session::{clamp_volume, truncate_name, Field, FieldChange, Session, SessionId};
pub use domain::shadow::ShadowCache;
pub use hid::consumer::MediaKey;
pub use protocol::codec::{decode_message, encode_framed, encode_message, ProtocolError};
pub use protocol::framing::{encode_frame, FrameDecoder, FramingError};
pub use protocol::messages::{Envelope, NackReason, SyncMessage};
pub use sync::engine::{LinkEngine, LinkEvent, LinkRole, LinkState};
pub use sync::timing::{SyncTimings, Tick};

//! Protocol module: frame layer, message types, binary codec, and id sequencing.

pub mod codec;
pub mod framing;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_framed, encode_message, ProtocolError};
pub use framing::{encode_frame, FrameDecoder, FramingError};
pub use messages::*;
pub use sequence::{seq_newer, MsgIdCounter};

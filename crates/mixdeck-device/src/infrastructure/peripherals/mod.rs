//! Raw peripheral signals and the adapters that turn them into input events.
//!
//! The hardware delivers noisy, low-level signals:
//!
//! - the touch controller reports `(x, y, pressed)` samples;
//! - the encoder pins report one transition per detent, with contact bounce;
//! - the button line reports level edges, also with bounce.
//!
//! The adapters in [`touch`] and [`debounce`] consume these through the raw
//! traits below and implement the application ports
//! ([`TouchStream`](crate::application::input::TouchStream),
//! [`EncoderStream`](crate::application::input::EncoderStream),
//! [`ButtonStream`](crate::application::input::ButtonStream)).
//!
//! Edges are timestamped where they are captured, so debouncing needs no
//! clock of its own.

pub mod debounce;
pub mod logging;
pub mod mock;
pub mod scripted;
pub mod touch;

/// One sample from the touch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchSample {
    pub x: u16,
    pub y: u16,
    pub pressed: bool,
}

/// One encoder transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderStep {
    pub at_ms: u64,
    /// `+1` clockwise, `-1` counter-clockwise.
    pub direction: i8,
}

/// A level change on the button line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEdge {
    pub at_ms: u64,
    pub pressed: bool,
}

/// The touch controller.
pub trait TouchController {
    /// Returns the next unread sample, if any.
    fn sample(&mut self) -> Option<TouchSample>;
}

/// The encoder's quadrature pins.
pub trait EncoderLines {
    fn next_step(&mut self) -> Option<EncoderStep>;
}

/// The push button's input line.
pub trait ButtonLine {
    fn next_edge(&mut self) -> Option<ButtonEdge>;
}

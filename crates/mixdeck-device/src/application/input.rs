//! Input events and the peripheral capability ports.
//!
//! The control loop never talks to hardware directly.  It polls the traits
//! below; the infrastructure layer implements them on top of the touch
//! controller, the encoder pins, the button line, and the USB CDC serial
//! port (or, in the simulator, on top of a script and a TCP socket).
//!
//! Every `poll` is non-blocking and returns `None` when nothing happened.

use thiserror::Error;

/// Errors reported by peripheral adapters.
#[derive(Debug, Error)]
pub enum PeripheralError {
    /// The serial transport went away (cable removed, host port closed).
    #[error("transport lost")]
    TransportLost,
    /// An I/O error on the serial transport.
    #[error("serial I/O error: {0}")]
    Serial(#[from] std::io::Error),
    /// The display rejected a draw call.
    #[error("display error: {0}")]
    Display(String),
    /// The USB HID endpoint rejected a report.
    #[error("HID error: {0}")]
    Hid(String),
}

/// Phase of a touch contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Press,
    Move,
    Release,
}

/// Duration class of a debounced button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressClass {
    Short,
    Long,
}

/// One touch report in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchPoint {
    pub x: u16,
    pub y: u16,
    pub phase: TouchPhase,
}

/// A debounced, transient user input.  Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Touch(TouchPoint),
    /// Signed detent count since the previous event.
    EncoderTick(i8),
    ButtonPress(PressClass),
}

/// Touch reports with press/move/release phases.
pub trait TouchStream {
    fn poll(&mut self) -> Option<TouchPoint>;
}

/// Debounced encoder detents.
pub trait EncoderStream {
    fn poll(&mut self) -> Option<i8>;
}

/// Debounced, classified button presses.
pub trait ButtonStream {
    fn poll(&mut self) -> Option<PressClass>;
}

/// The byte transport to the host.
///
/// Implementations never block: `read` returns `Ok(0)` when no bytes are
/// waiting and `write` queues what the transport cannot take yet.
pub trait SerialPort {
    /// `true` while the host side has the port open.
    fn is_open(&mut self) -> bool;

    /// Reads waiting bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), PeripheralError>;
}

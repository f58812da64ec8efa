//! In-memory peripherals for unit and integration testing.
//!
//! # Why in-memory peripherals?
//!
//! The real peripherals sit behind SPI, I2C, GPIO interrupts, and the USB
//! stack.  None of that exists on a development machine, and none of it can
//! be observed from a test.  The types here replace each peripheral with a
//! shared queue or a recording:
//!
//! - [`MemorySerial`] – a serial port whose inbound bytes the test pushes and
//!   whose outbound bytes the test takes.  `set_open(false)` simulates
//!   pulling the cable.
//! - [`QueueTouch`], [`QueueEncoder`], [`QueueButton`] – already-debounced
//!   input events, popped one per `poll`.
//! - [`RecordingSurface`], [`RecordingHid`] – record every draw call and
//!   every HID report.
//!
//! Every type is a cheap `Clone` handle around an `Arc<Mutex<...>>`: one
//! clone goes into the `DeviceApp`, the other stays with the test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::application::input::{
    ButtonStream, EncoderStream, PeripheralError, PressClass, SerialPort, TouchPoint, TouchStream,
};
use crate::application::media_keys::HidTransport;
use crate::application::ui::{Color, DrawOp, DrawSurface, Rect};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Serial ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Line {
    open: bool,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

/// A serial port backed by two byte queues.
#[derive(Debug, Clone, Default)]
pub struct MemorySerial {
    line: Arc<Mutex<Line>>,
}

impl MemorySerial {
    /// Creates a closed port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens or closes the host side of the port.
    pub fn set_open(&self, open: bool) {
        let mut line = lock(&self.line);
        line.open = open;
        if !open {
            line.inbound.clear();
        }
    }

    /// Queues bytes for the device to read.
    pub fn push_inbound(&self, bytes: &[u8]) {
        lock(&self.line).inbound.extend(bytes.iter().copied());
    }

    /// Takes everything the device wrote.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.line).outbound)
    }
}

impl SerialPort for MemorySerial {
    fn is_open(&mut self) -> bool {
        lock(&self.line).open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        let mut line = lock(&self.line);
        if !line.open {
            return Err(PeripheralError::TransportLost);
        }
        let n = buf.len().min(line.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(line.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PeripheralError> {
        let mut line = lock(&self.line);
        if !line.open {
            return Err(PeripheralError::TransportLost);
        }
        line.outbound.extend_from_slice(bytes);
        Ok(())
    }
}

// ── Input queues ──────────────────────────────────────────────────────────────

/// Generates a queue-backed input stream.
macro_rules! queue_stream {
    ($name:ident, $item:ty, $port:ident) => {
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            queue: Arc<Mutex<VecDeque<$item>>>,
        }

        impl $name {
            pub fn push(&self, item: $item) {
                lock(&self.queue).push_back(item);
            }

            pub fn len(&self) -> usize {
                lock(&self.queue).len()
            }

            pub fn is_empty(&self) -> bool {
                lock(&self.queue).is_empty()
            }
        }

        impl $port for $name {
            fn poll(&mut self) -> Option<$item> {
                lock(&self.queue).pop_front()
            }
        }
    };
}

queue_stream!(QueueTouch, TouchPoint, TouchStream);
queue_stream!(QueueEncoder, i8, EncoderStream);
queue_stream!(QueueButton, PressClass, ButtonStream);

// ── Recorders ─────────────────────────────────────────────────────────────────

/// Records every draw call.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    ops: Arc<Mutex<Vec<DrawOp>>>,
}

impl RecordingSurface {
    pub fn ops(&self) -> Vec<DrawOp> {
        lock(&self.ops).clone()
    }

    /// Every string drawn so far, in order.
    pub fn texts(&self) -> Vec<String> {
        lock(&self.ops)
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.clone()),
                DrawOp::Fill { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.ops).clear();
    }
}

impl DrawSurface for RecordingSurface {
    fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), PeripheralError> {
        lock(&self.ops).push(DrawOp::Fill { rect, color });
        Ok(())
    }

    fn blit_text(&mut self, x: u16, y: u16, text: &str, color: Color) -> Result<(), PeripheralError> {
        lock(&self.ops).push(DrawOp::Text {
            x,
            y,
            text: text.to_string(),
            color,
        });
        Ok(())
    }
}

/// Records every HID report.
#[derive(Debug, Clone, Default)]
pub struct RecordingHid {
    reports: Arc<Mutex<Vec<u8>>>,
}

impl RecordingHid {
    pub fn reports(&self) -> Vec<u8> {
        lock(&self.reports).clone()
    }
}

impl HidTransport for RecordingHid {
    fn send_report(&mut self, report: u8) -> Result<(), PeripheralError> {
        lock(&self.reports).push(report);
        Ok(())
    }
}

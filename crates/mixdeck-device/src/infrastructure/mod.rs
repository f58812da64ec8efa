//! Infrastructure layer of the device.
//!
//! - **`peripherals`** – Adapters from raw hardware signals (touch samples,
//!   encoder transitions, button edges) to the application's input ports,
//!   with debouncing and touch phase tracking.  Also holds the in-memory
//!   peripherals used by tests and the scripted/logging ones used by the
//!   simulator.
//! - **`serial`** – The simulator's stand-in for the USB CDC serial port: a
//!   non-blocking TCP connection to the host application.

pub mod peripherals;
pub mod serial;

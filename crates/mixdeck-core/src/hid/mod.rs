//! USB HID definitions shared by the device firmware and the host logger.

pub mod consumer;

pub use consumer::{MediaKey, RELEASE_REPORT};

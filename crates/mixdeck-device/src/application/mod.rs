//! Application layer of the device.
//!
//! # What lives here?
//!
//! - **`input`** – The `InputEvent` vocabulary shared by the peripherals and
//!   the use cases below, plus the capability ports (`TouchStream`,
//!   `EncoderStream`, `ButtonStream`, `SerialPort`) the infrastructure layer
//!   implements.
//!
//! - **`reconciler`** – Owns the `ShadowCache`.  Turns local edits into
//!   `Intent`s, masks inbound `Delta`s while a field is dirty, and decides
//!   when a dirty field is released.
//!
//! - **`media_keys`** – Stateless mapping from button presses and
//!   encoder turns to HID consumer-control reports.
//!
//! - **`ui`** – Screen layout, the pure render function, and redraw-on-change.
//!
//! - **`control_loop`** – The cooperative scheduler tying it all together.

pub mod control_loop;
pub mod input;
pub mod media_keys;
pub mod reconciler;
pub mod ui;

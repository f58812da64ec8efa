//! mixdeck-device library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the simulator binary in `main.rs` share the same module tree.
//!
//! # What does the device do? (for beginners)
//!
//! The *device* is the small touchscreen board with a rotary encoder and a
//! push button that sits on the desk.  It has no idea which applications are
//! playing audio; the host tells it.  The device:
//!
//! 1. Opens the serial link, sends `Hello`, and receives a `FullSnapshot` of
//!    the host's audio sessions into its `ShadowCache`.
//! 2. Draws the session list and a volume slider for the selected session.
//! 3. Turns touches and encoder turns into `Intent` messages, showing the new
//!    value immediately while the host confirms it.
//! 4. Merges `Delta` updates from the host without overwriting a slider the
//!    user is still dragging.
//! 5. Sends standard media keys (Play/Pause, Mute, Volume Up/Down) over USB
//!    HID.  These work even when the host application is not running.
//!
//! Everything runs in one cooperative loop ([`application::control_loop`]).
//! Nothing blocks: the serial port, touch controller, and encoder are polled,
//! and each poll does a bounded amount of work.

/// Runtime parameters of the device.
pub mod config;

/// Application layer: reconciler, media-key bridge, UI model, control loop.
pub mod application;

/// Infrastructure layer: peripheral adapters, debouncing, serial transport.
pub mod infrastructure;

//! Media-key bridge: gestures to USB HID consumer-control reports.
//!
//! | Gesture                                   | Key                    |
//! |-------------------------------------------|------------------------|
//! | Button, short press                       | Play/Pause             |
//! | Button, long press                        | Mute                   |
//! | Encoder, no session selected or link down | Volume Up / Volume Down, one per detent |
//! | Media strip buttons on screen             | Prev, Play/Pause, Next, Mute |
//!
//! The bridge never touches the shadow cache.  Emission is fire-and-forget:
//! each key is one press report followed by one release report, nothing is
//! repeated, and a rejected report is logged and forgotten.  The release is
//! sent even when the press was rejected, so a press that did reach the host
//! never leaves the key held down.

use mixdeck_core::hid::consumer::RELEASE_REPORT;
use mixdeck_core::MediaKey;
use tracing::{debug, warn};

use crate::application::input::{PeripheralError, PressClass};

/// The USB HID consumer-control endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait HidTransport {
    /// Sends one input report.
    fn send_report(&mut self, report: u8) -> Result<(), PeripheralError>;
}

/// Key sent for a button press of the given duration class.
pub fn key_for_press(class: PressClass) -> MediaKey {
    match class {
        PressClass::Short => MediaKey::PlayPause,
        PressClass::Long => MediaKey::Mute,
    }
}

/// Keys sent for an encoder turn when it is not driving a session.
pub fn keys_for_encoder(detents: i8) -> Vec<MediaKey> {
    let key = if detents > 0 {
        MediaKey::VolumeUp
    } else {
        MediaKey::VolumeDown
    };
    vec![key; usize::from(detents.unsigned_abs())]
}

/// Sends media keys through a [`HidTransport`].
pub struct MediaKeyBridge {
    hid: Box<dyn HidTransport>,
}

impl MediaKeyBridge {
    pub fn new(hid: Box<dyn HidTransport>) -> Self {
        Self { hid }
    }

    /// Sends `key` as a press report followed by a release report.
    ///
    /// Returns `false` if the endpoint rejected either report.
    pub fn emit(&mut self, key: MediaKey) -> bool {
        let pressed = self.hid.send_report(key.press_report());
        if let Err(e) = &pressed {
            warn!("HID press of {} failed: {e}", key.label());
        }
        let released = self.hid.send_report(RELEASE_REPORT);
        if let Err(e) = &released {
            warn!("HID release of {} failed: {e}", key.label());
        }
        let sent = pressed.is_ok() && released.is_ok();
        if sent {
            debug!("media key {}", key.label());
        }
        sent
    }

    /// Handles a button press.  Returns the key that was sent.
    pub fn on_button(&mut self, class: PressClass) -> MediaKey {
        let key = key_for_press(class);
        self.emit(key);
        key
    }

    /// Handles an encoder turn with no session to drive.
    pub fn on_encoder(&mut self, detents: i8) -> Vec<MediaKey> {
        let keys = keys_for_encoder(detents);
        for key in &keys {
            self.emit(*key);
        }
        keys
    }
}

//! USB HID Consumer Control usages (page 0x0C).
//!
//! # Consumer page vs. keyboard page (for beginners)
//!
//! Ordinary keys live on the HID *Keyboard/Keypad* page.  Media keys (volume,
//! mute, play/pause, track skip) live on a separate page called *Consumer*
//! (0x0C).  Every operating system understands these usages without a driver,
//! which is why the device can control system volume even when the MixDeck
//! host application is not running.
//!
//! | Key         | Usage ID | Report bit |
//! |-------------|----------|------------|
//! | Mute        | 0x00E2   | 0x01       |
//! | Volume Up   | 0x00E9   | 0x02       |
//! | Volume Down | 0x00EA   | 0x04       |
//! | Play/Pause  | 0x00CD   | 0x08       |
//! | Next Track  | 0x00B5   | 0x10       |
//! | Prev Track  | 0x00B6   | 0x20       |
//!
//! The device's report descriptor declares one bit per key in a single byte.
//! Pressing a key sends the byte with that bit set; releasing it sends 0x00.

use serde::{Deserialize, Serialize};

/// A standard media-control key.
///
/// The numeric value of each variant is its Consumer page usage ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MediaKey {
    Mute = 0x00E2,
    VolumeUp = 0x00E9,
    VolumeDown = 0x00EA,
    PlayPause = 0x00CD,
    NextTrack = 0x00B5,
    PrevTrack = 0x00B6,
}

/// All keys in report-bit order.
pub const ALL_MEDIA_KEYS: [MediaKey; 6] = [
    MediaKey::Mute,
    MediaKey::VolumeUp,
    MediaKey::VolumeDown,
    MediaKey::PlayPause,
    MediaKey::NextTrack,
    MediaKey::PrevTrack,
];

/// The "all keys released" report.
pub const RELEASE_REPORT: u8 = 0x00;

/// Report descriptor for a one-byte consumer-control bitmap with six keys.
pub const REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x06, //   Report Count (6)
    0x09, 0xE2, //   Usage (Mute)
    0x09, 0xE9, //   Usage (Volume Increment)
    0x09, 0xEA, //   Usage (Volume Decrement)
    0x09, 0xCD, //   Usage (Play/Pause)
    0x09, 0xB5, //   Usage (Scan Next Track)
    0x09, 0xB6, //   Usage (Scan Previous Track)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x02, //   Report Count (2)
    0x81, 0x01, //   Input (Constant) – padding
    0xC0, // End Collection
];

impl MediaKey {
    /// Consumer page usage ID.
    pub fn usage(self) -> u16 {
        self as u16
    }

    /// Looks up a key from its usage ID.
    pub fn from_usage(usage: u16) -> Option<Self> {
        ALL_MEDIA_KEYS.into_iter().find(|k| k.usage() == usage)
    }

    /// The bit this key occupies in the one-byte input report.
    pub fn report_bit(self) -> u8 {
        match self {
            MediaKey::Mute => 0x01,
            MediaKey::VolumeUp => 0x02,
            MediaKey::VolumeDown => 0x04,
            MediaKey::PlayPause => 0x08,
            MediaKey::NextTrack => 0x10,
            MediaKey::PrevTrack => 0x20,
        }
    }

    /// The press report; follow it with [`RELEASE_REPORT`].
    pub fn press_report(self) -> u8 {
        self.report_bit()
    }

    /// Human-readable label for logs and on-screen buttons.
    pub fn label(self) -> &'static str {
        match self {
            MediaKey::Mute => "Mute",
            MediaKey::VolumeUp => "Vol+",
            MediaKey::VolumeDown => "Vol-",
            MediaKey::PlayPause => "Play",
            MediaKey::NextTrack => "Next",
            MediaKey::PrevTrack => "Prev",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_roundtrips_for_all_keys() {
        for key in ALL_MEDIA_KEYS {
            assert_eq!(MediaKey::from_usage(key.usage()), Some(key));
        }
    }

    #[test]
    fn test_from_usage_rejects_unknown() {
        assert_eq!(MediaKey::from_usage(0x0004), None);
    }

    #[test]
    fn test_report_bits_are_distinct_single_bits() {
        let mut seen = 0u8;
        for key in ALL_MEDIA_KEYS {
            let bit = key.report_bit();
            assert_eq!(bit.count_ones(), 1, "{key:?} must use exactly one bit");
            assert_eq!(seen & bit, 0, "{key:?} overlaps another key");
            seen |= bit;
        }
    }

    #[test]
    fn test_descriptor_lists_every_usage() {
        for key in ALL_MEDIA_KEYS {
            let usage = key.usage() as u8;
            assert!(
                REPORT_DESCRIPTOR.windows(2).any(|w| w == [0x09, usage]),
                "descriptor is missing {key:?}"
            );
        }
    }
}

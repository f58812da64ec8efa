//! Device configuration.
//!
//! The firmware has no file system, so the configuration is a plain struct
//! whose defaults are the shipped values.  The simulator overrides a few of
//! them from the command line.

use mixdeck_core::sync::timing::DEFAULT_TICK_MS;
use mixdeck_core::{SyncTimings, Tick};

/// Screen geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub width: u16,
    pub height: u16,
    /// Width of the session list on the left.
    pub list_width: u16,
    /// Width of the volume panel on the right.
    pub panel_width: u16,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: 480,
            height: 320,
            list_width: 360,
            panel_width: 120,
        }
    }
}

/// All tunables of the device firmware.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Scheduler tick period in milliseconds.
    pub tick_ms: u64,
    /// Link timing, identical to the host's `[sync]` defaults.
    pub sync: SyncTimings,
    /// Touch-to-volume quantization step.
    pub slider_step: u8,
    /// Volume change per encoder detent.
    pub encoder_step: u8,
    /// Input inactivity after which a dirty field is released.
    pub dirty_debounce_ticks: Tick,
    /// Serial bytes consumed per loop iteration.
    pub max_serial_bytes: usize,
    /// Input events consumed per loop iteration.
    pub max_input_events: usize,
    pub encoder_debounce_ms: u64,
    pub button_debounce_ms: u64,
    /// Presses held at least this long are classified as long.
    pub long_press_ms: u64,
    pub display: DisplayGeometry,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            sync: SyncTimings::default(),
            slider_step: 2,
            encoder_step: 2,
            dirty_debounce_ticks: 50,
            max_serial_bytes: 256,
            max_input_events: 8,
            encoder_debounce_ms: 5,
            button_debounce_ms: 50,
            long_press_ms: 800,
            display: DisplayGeometry::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_panels_fill_the_screen_width() {
        let d = DisplayGeometry::default();
        assert_eq!(d.list_width + d.panel_width, d.width);
    }

    #[test]
    fn test_dirty_debounce_is_half_a_second_at_default_tick() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.dirty_debounce_ticks * cfg.tick_ms, 500);
    }
}

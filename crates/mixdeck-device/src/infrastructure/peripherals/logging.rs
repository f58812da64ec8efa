//! Display and HID stand-ins for the simulator that write to the log.

use mixdeck_core::MediaKey;
use tracing::{debug, info};

use crate::application::input::PeripheralError;
use crate::application::media_keys::HidTransport;
use crate::application::ui::{Color, DrawSurface, Rect};

/// Logs draw calls at `debug` and counts them.
#[derive(Debug, Default)]
pub struct LoggingSurface {
    calls: u64,
}

impl LoggingSurface {
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DrawSurface for LoggingSurface {
    fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), PeripheralError> {
        self.calls += 1;
        debug!(
            "fill_rect x={} y={} w={} h={} color={:#06x}",
            rect.x, rect.y, rect.w, rect.h, color.0
        );
        Ok(())
    }

    fn blit_text(&mut self, x: u16, y: u16, text: &str, color: Color) -> Result<(), PeripheralError> {
        self.calls += 1;
        debug!("blit_text x={x} y={y} color={:#06x} {text:?}", color.0);
        Ok(())
    }
}

/// Logs HID reports at `info`, naming the key for press reports.
#[derive(Debug, Default)]
pub struct LoggingHid;

impl HidTransport for LoggingHid {
    fn send_report(&mut self, report: u8) -> Result<(), PeripheralError> {
        let key = mixdeck_core::hid::consumer::ALL_MEDIA_KEYS
            .into_iter()
            .find(|k: &MediaKey| k.press_report() == report);
        match key {
            Some(key) => info!("HID report {report:#04x} ({} down)", key.label()),
            None => info!("HID report {report:#04x} (release)"),
        }
        Ok(())
    }
}

//! Fixed-window debouncing for the encoder and the button.
//!
//! A mechanical contact chatters for a few milliseconds when it changes
//! state.  Both debouncers accept an edge and then reject every further edge
//! inside a fixed window after it.  The encoder window is short (5 ms) so fast
//! spins still register; the button window is longer (50 ms).
//!
//! The button debouncer also classifies each press by how long it was held.

use tracing::trace;

use crate::application::input::{ButtonStream, EncoderStream, PressClass};
use crate::infrastructure::peripherals::{ButtonLine, EncoderLines};

/// `true` if an edge at `at_ms` falls outside the window after `last`.
fn outside_window(last: Option<u64>, at_ms: u64, window_ms: u64) -> bool {
    match last {
        Some(last) => at_ms.saturating_sub(last) >= window_ms,
        None => true,
    }
}

/// Classifies a press by how long the button was held.
pub fn classify_press(held_ms: u64, long_press_ms: u64) -> PressClass {
    if held_ms >= long_press_ms {
        PressClass::Long
    } else {
        PressClass::Short
    }
}

/// Debounced encoder: sums accepted transitions into a signed detent count.
#[derive(Debug)]
pub struct DebouncedEncoder<L> {
    lines: L,
    window_ms: u64,
    last_accepted: Option<u64>,
}

impl<L: EncoderLines> DebouncedEncoder<L> {
    pub fn new(lines: L, window_ms: u64) -> Self {
        Self {
            lines,
            window_ms,
            last_accepted: None,
        }
    }
}

impl<L: EncoderLines> EncoderStream for DebouncedEncoder<L> {
    fn poll(&mut self) -> Option<i8> {
        let mut delta: i32 = 0;
        while delta.abs() < i32::from(i8::MAX) {
            let Some(step) = self.lines.next_step() else {
                break;
            };
            if !outside_window(self.last_accepted, step.at_ms, self.window_ms) {
                trace!("encoder bounce at {} ms", step.at_ms);
                continue;
            }
            self.last_accepted = Some(step.at_ms);
            delta += i32::from(step.direction.signum());
        }
        (delta != 0).then_some(delta as i8)
    }
}

/// Debounced push button producing one [`PressClass`] per release.
#[derive(Debug)]
pub struct DebouncedButton<L> {
    line: L,
    window_ms: u64,
    long_press_ms: u64,
    last_edge: Option<u64>,
    pressed_at: Option<u64>,
}

impl<L: ButtonLine> DebouncedButton<L> {
    pub fn new(line: L, window_ms: u64, long_press_ms: u64) -> Self {
        Self {
            line,
            window_ms,
            long_press_ms,
            last_edge: None,
            pressed_at: None,
        }
    }
}

impl<L: ButtonLine> ButtonStream for DebouncedButton<L> {
    fn poll(&mut self) -> Option<PressClass> {
        while let Some(edge) = self.line.next_edge() {
            if !outside_window(self.last_edge, edge.at_ms, self.window_ms) {
                trace!("button bounce at {} ms", edge.at_ms);
                continue;
            }
            self.last_edge = Some(edge.at_ms);
            match (edge.pressed, self.pressed_at) {
                (true, None) => self.pressed_at = Some(edge.at_ms),
                (false, Some(start)) => {
                    self.pressed_at = None;
                    let held = edge.at_ms.saturating_sub(start);
                    return Some(classify_press(held, self.long_press_ms));
                }
                // Same level twice: an edge was lost, keep the first.
                _ => {}
            }
        }
        None
    }
}

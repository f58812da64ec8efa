//! Touch phase tracking.
//!
//! The touch controller only reports "pressed at (x, y)" or "not pressed".
//! [`TouchTracker`] remembers the previous sample and turns the stream into
//! `Press`, `Move`, and `Release` phases.  Repeated samples at the same
//! position while held produce nothing.

use crate::application::input::{TouchPhase, TouchPoint, TouchStream};
use crate::infrastructure::peripherals::{TouchController, TouchSample};

#[derive(Debug)]
pub struct TouchTracker<C> {
    controller: C,
    last: Option<(u16, u16)>,
}

impl<C> TouchTracker<C> {
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            last: None,
        }
    }

    /// Feeds one sample and returns the phase change it caused, if any.
    pub fn track(&mut self, sample: TouchSample) -> Option<TouchPoint> {
        let at = (sample.x, sample.y);
        let phase = match (sample.pressed, self.last) {
            (true, None) => TouchPhase::Press,
            (true, Some(prev)) if prev == at => return None,
            (true, Some(_)) => TouchPhase::Move,
            (false, Some((x, y))) => {
                self.last = None;
                return Some(TouchPoint {
                    x,
                    y,
                    phase: TouchPhase::Release,
                });
            }
            (false, None) => return None,
        };
        self.last = Some(at);
        Some(TouchPoint {
            x: sample.x,
            y: sample.y,
            phase,
        })
    }
}

impl<C: TouchController> TouchStream for TouchTracker<C> {
    fn poll(&mut self) -> Option<TouchPoint> {
        while let Some(sample) = self.controller.sample() {
            if let Some(point) = self.track(sample) {
                return Some(point);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: u16, y: u16, pressed: bool) -> TouchSample {
        TouchSample { x, y, pressed }
    }

    fn point(x: u16, y: u16, phase: TouchPhase) -> Option<TouchPoint> {
        Some(TouchPoint { x, y, phase })
    }

    #[test]
    fn test_press_move_release_sequence() {
        let mut t = TouchTracker::new(());
        assert_eq!(t.track(sample(10, 20, true)), point(10, 20, TouchPhase::Press));
        assert_eq!(t.track(sample(10, 20, true)), None);
        assert_eq!(t.track(sample(12, 25, true)), point(12, 25, TouchPhase::Move));
        // The release is reported where the finger was last seen.
        assert_eq!(t.track(sample(0, 0, false)), point(12, 25, TouchPhase::Release));
        assert_eq!(t.track(sample(0, 0, false)), None);
    }

    #[test]
    fn test_poll_skips_samples_without_phase_change() {
        struct Samples(Vec<TouchSample>);
        impl TouchController for Samples {
            fn sample(&mut self) -> Option<TouchSample> {
                if self.0.is_empty() {
                    None
                } else {
                    Some(self.0.remove(0))
                }
            }
        }

        let mut t = TouchTracker::new(Samples(vec![
            sample(0, 0, false),
            sample(5, 5, true),
            sample(5, 5, true),
            sample(5, 5, true),
            sample(5, 5, false),
        ]));

        assert_eq!(t.poll(), point(5, 5, TouchPhase::Press));
        assert_eq!(t.poll(), point(5, 5, TouchPhase::Release));
        assert_eq!(t.poll(), None);
    }
}

//! Scripted raw peripherals for the simulator.
//!
//! A [`Script`] is a TOML list of timed gestures:
//!
//! ```toml
//! [[step]]
//! at_ms = 2000
//! action = "tap"
//! x = 40
//! y = 40
//!
//! [[step]]
//! at_ms = 2500
//! action = "turn"
//! detents = 3
//! ```
//!
//! [`ScriptedPeripherals::compile`] expands each gesture into the raw signals
//! real hardware would produce (touch samples, encoder transitions, button
//! edges with contact bounce).  The sources release each signal once the
//! shared [`SimClock`] reaches its timestamp, so the simulator exercises the
//! same debouncing and touch tracking as the firmware.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use thiserror::Error;

use crate::infrastructure::peripherals::{
    ButtonEdge, ButtonLine, EncoderLines, EncoderStep, TouchController, TouchSample,
};

/// Script played when the simulator is started without `--script`.
pub const DEMO_SCRIPT: &str = include_str!("../../../scripts/demo.toml");

/// Spacing of generated touch samples and encoder transitions.
const SAMPLE_SPACING_MS: u64 = 20;
/// How long a tap is held.
const TAP_HOLD_MS: u64 = 80;

/// Errors loading a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid script: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One gesture.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Gesture {
    /// Touch and lift at one point.
    Tap { x: u16, y: u16 },
    /// Touch at `(x, from_y)`, slide vertically to `to_y`, lift.
    Drag {
        x: u16,
        from_y: u16,
        to_y: u16,
        #[serde(default = "default_drag_ms")]
        duration_ms: u64,
    },
    /// Turn the encoder; negative is counter-clockwise.
    Turn { detents: i8 },
    /// Press the button for `hold_ms`.
    Press { hold_ms: u64 },
}

fn default_drag_ms() -> u64 {
    400
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub gesture: Gesture,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Script {
    #[serde(default, rename = "step")]
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn demo() -> Result<Self, ScriptError> {
        Self::parse(DEMO_SCRIPT)
    }
}

/// Simulated milliseconds since start, shared by all scripted sources.
#[derive(Debug, Clone, Default)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::Relaxed);
    }

    pub fn now_ms(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Timestamped signals released as the clock passes them.
#[derive(Debug, Clone)]
pub struct Timeline<T> {
    clock: SimClock,
    items: Arc<Mutex<VecDeque<(u64, T)>>>,
}

impl<T> Timeline<T> {
    fn new(clock: SimClock, mut items: Vec<(u64, T)>) -> Self {
        items.sort_by_key(|(at, _)| *at);
        Self {
            clock,
            items: Arc::new(Mutex::new(items.into())),
        }
    }

    fn next_due(&mut self) -> Option<T> {
        let now = self.clock.now_ms();
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        match items.front() {
            Some((at, _)) if *at <= now => items.pop_front().map(|(_, item)| item),
            _ => None,
        }
    }

    /// Signals not yet released.
    pub fn remaining(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl TouchController for Timeline<TouchSample> {
    fn sample(&mut self) -> Option<TouchSample> {
        self.next_due()
    }
}

impl EncoderLines for Timeline<EncoderStep> {
    fn next_step(&mut self) -> Option<EncoderStep> {
        self.next_due()
    }
}

impl ButtonLine for Timeline<ButtonEdge> {
    fn next_edge(&mut self) -> Option<ButtonEdge> {
        self.next_due()
    }
}

/// Raw signal sources generated from a script.
#[derive(Debug, Clone)]
pub struct ScriptedPeripherals {
    pub touch: Timeline<TouchSample>,
    pub encoder: Timeline<EncoderStep>,
    pub button: Timeline<ButtonEdge>,
}

impl ScriptedPeripherals {
    pub fn compile(script: &Script, clock: SimClock) -> Self {
        let mut touch = Vec::new();
        let mut encoder = Vec::new();
        let mut button = Vec::new();

        for step in &script.steps {
            let t = step.at_ms;
            match step.gesture {
                Gesture::Tap { x, y } => {
                    touch.push((t, TouchSample { x, y, pressed: true }));
                    touch.push((t + TAP_HOLD_MS, TouchSample { x, y, pressed: false }));
                }
                Gesture::Drag {
                    x,
                    from_y,
                    to_y,
                    duration_ms,
                } => {
                    let samples = (duration_ms / SAMPLE_SPACING_MS).max(1);
                    for i in 0..=samples {
                        let y = i64::from(from_y)
                            + (i64::from(to_y) - i64::from(from_y)) * i as i64 / samples as i64;
                        let sample = TouchSample {
                            x,
                            y: y as u16,
                            pressed: true,
                        };
                        touch.push((t + i * SAMPLE_SPACING_MS, sample));
                    }
                    let end = t + (samples + 1) * SAMPLE_SPACING_MS;
                    touch.push((end, TouchSample { x, y: to_y, pressed: false }));
                }
                Gesture::Turn { detents } => {
                    let direction = detents.signum();
                    for i in 0..u64::from(detents.unsigned_abs()) {
                        let at_ms = t + i * SAMPLE_SPACING_MS;
                        encoder.push((at_ms, EncoderStep { at_ms, direction }));
                        // Contact bounce right after the detent.
                        let bounce = at_ms + 1;
                        encoder.push((bounce, EncoderStep { at_ms: bounce, direction }));
                    }
                }
                Gesture::Press { hold_ms } => {
                    let edge = |at_ms, pressed| (at_ms, ButtonEdge { at_ms, pressed });
                    button.push(edge(t, true));
                    button.push(edge(t + 3, false));
                    button.push(edge(t + 6, true));
                    button.push(edge(t + hold_ms.max(SAMPLE_SPACING_MS), false));
                }
            }
        }

        Self {
            touch: Timeline::new(clock.clone(), touch),
            encoder: Timeline::new(clock.clone(), encoder),
            button: Timeline::new(clock, button),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::input::{ButtonStream, EncoderStream, PressClass, TouchPhase, TouchStream};
    use crate::infrastructure::peripherals::debounce::{DebouncedButton, DebouncedEncoder};
    use crate::infrastructure::peripherals::touch::TouchTracker;

    #[test]
    fn test_demo_script_parses() {
        let script = Script::demo().unwrap();
        assert!(!script.steps.is_empty());
        assert!(script.steps.windows(2).all(|w| w[0].at_ms <= w[1].at_ms));
    }

    #[test]
    fn test_parse_each_gesture() {
        let script = Script::parse(
            r#"
            [[step]]
            at_ms = 10
            action = "tap"
            x = 1
            y = 2

            [[step]]
            at_ms = 20
            action = "drag"
            x = 400
            from_y = 200
            to_y = 60

            [[step]]
            at_ms = 30
            action = "turn"
            detents = -2

            [[step]]
            at_ms = 40
            action = "press"
            hold_ms = 900
            "#,
        )
        .unwrap();

        assert_eq!(script.steps[0].gesture, Gesture::Tap { x: 1, y: 2 });
        assert_eq!(
            script.steps[1].gesture,
            Gesture::Drag {
                x: 400,
                from_y: 200,
                to_y: 60,
                duration_ms: 400
            }
        );
        assert_eq!(script.steps[2].gesture, Gesture::Turn { detents: -2 });
        assert_eq!(script.steps[3].gesture, Gesture::Press { hold_ms: 900 });
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = Script::parse("[[step]]\nat_ms = 1\naction = \"juggle\"\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }

    #[test]
    fn test_signals_are_released_by_the_clock() {
        // Arrange
        let clock = SimClock::default();
        let script = Script {
            steps: vec![ScriptStep {
                at_ms: 100,
                gesture: Gesture::Tap { x: 5, y: 6 },
            }],
        };
        let peripherals = ScriptedPeripherals::compile(&script, clock.clone());
        let mut touch = TouchTracker::new(peripherals.touch);

        // Act / Assert
        clock.set(99);
        assert_eq!(touch.poll(), None);
        clock.set(100);
        assert_eq!(touch.poll().map(|p| p.phase), Some(TouchPhase::Press));
        clock.set(180);
        assert_eq!(touch.poll().map(|p| p.phase), Some(TouchPhase::Release));
    }

    #[test]
    fn test_generated_bounce_is_removed_by_debouncers() {
        let clock = SimClock::default();
        let script = Script {
            steps: vec![
                ScriptStep {
                    at_ms: 0,
                    gesture: Gesture::Turn { detents: 3 },
                },
                ScriptStep {
                    at_ms: 0,
                    gesture: Gesture::Press { hold_ms: 1000 },
                },
            ],
        };
        let peripherals = ScriptedPeripherals::compile(&script, clock.clone());
        let mut encoder = DebouncedEncoder::new(peripherals.encoder, 5);
        let mut button = DebouncedButton::new(peripherals.button, 50, 800);

        clock.set(2000);

        assert_eq!(encoder.poll(), Some(3));
        assert_eq!(button.poll(), Some(PressClass::Long));
    }
}

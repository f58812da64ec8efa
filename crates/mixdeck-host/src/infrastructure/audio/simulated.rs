//! In-memory audio backend for tests and for running the host without an OS
//! mixer integration.
//!
//! The simulated mixer holds a scripted list of sessions.  Tests (and the
//! binary's demo mode) can start and stop "processes" and change volumes as if
//! another application had done it; subscribed callbacks fire exactly like an
//! OS notification would.

use std::sync::{Mutex, MutexGuard, PoisonError};

use mixdeck_core::{Field, SessionId};
use tracing::debug;

use super::{normalize_scalar, to_scalar, AudioBackend, AudioError, AudioSessionInfo, ChangeCallback};

/// Scripted per-process mixer.
#[derive(Default)]
pub struct SimulatedBackend {
    sessions: Mutex<Vec<AudioSessionInfo>>,
    listener: Mutex<Option<ChangeCallback>>,
    /// Every write received through `set_volume` / `set_mute`.
    writes: Mutex<Vec<(SessionId, Field, i32)>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedBackend {
    pub fn new(sessions: Vec<AudioSessionInfo>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            ..Self::default()
        }
    }

    /// A small fixed set of sessions for demo runs.
    pub fn with_demo_sessions() -> Self {
        let demo = [(1, "Music", 0.4), (2, "Call", 0.8), (3, "Browser", 0.65), (4, "Game", 1.0)];
        Self::new(
            demo.iter()
                .map(|(id, name, scalar)| AudioSessionInfo {
                    id: SessionId(*id),
                    name: (*name).to_string(),
                    scalar: *scalar,
                    muted: false,
                })
                .collect(),
        )
    }

    /// Simulates a new audio-producing process.
    pub fn spawn_process(&self, info: AudioSessionInfo) {
        debug!("simulated audio: {} started", info.id);
        relock(&self.sessions).push(info);
    }

    /// Simulates a process exit.  Returns `false` if it was not running.
    pub fn exit_process(&self, id: SessionId) -> bool {
        let mut sessions = relock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        sessions.len() != before
    }

    /// Simulates another application changing a session's volume.
    pub fn set_external_volume(&self, id: SessionId, scalar: f32) -> bool {
        let found = self.update(id, |s| s.scalar = scalar.clamp(0.0, 1.0));
        if found {
            self.notify(id, Field::Volume, i32::from(normalize_scalar(scalar)));
        }
        found
    }

    /// Simulates another application muting or unmuting a session.
    pub fn set_external_mute(&self, id: SessionId, muted: bool) -> bool {
        let found = self.update(id, |s| s.muted = muted);
        if found {
            self.notify(id, Field::Muted, i32::from(muted));
        }
        found
    }

    /// Returns the current native state of one session.
    pub fn session(&self, id: SessionId) -> Option<AudioSessionInfo> {
        relock(&self.sessions).iter().find(|s| s.id == id).cloned()
    }

    /// Returns every `(id, field, value)` written through the backend port.
    pub fn writes(&self) -> Vec<(SessionId, Field, i32)> {
        relock(&self.writes).clone()
    }

    fn update(&self, id: SessionId, f: impl FnOnce(&mut AudioSessionInfo)) -> bool {
        match relock(&self.sessions).iter_mut().find(|s| s.id == id) {
            Some(session) => {
                f(session);
                true
            }
            None => false,
        }
    }

    fn notify(&self, id: SessionId, field: Field, value: i32) {
        if let Some(callback) = relock(&self.listener).as_ref() {
            callback(id, field, value);
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn enumerate_sessions(&self) -> Result<Vec<AudioSessionInfo>, AudioError> {
        Ok(relock(&self.sessions).clone())
    }

    fn set_volume(&self, id: SessionId, volume: u8) -> Result<(), AudioError> {
        if !self.update(id, |s| s.scalar = to_scalar(volume)) {
            return Err(AudioError::SessionGone(id));
        }
        relock(&self.writes).push((id, Field::Volume, i32::from(volume)));
        Ok(())
    }

    fn set_mute(&self, id: SessionId, muted: bool) -> Result<(), AudioError> {
        if !self.update(id, |s| s.muted = muted) {
            return Err(AudioError::SessionGone(id));
        }
        relock(&self.writes).push((id, Field::Muted, i32::from(muted)));
        Ok(())
    }

    fn subscribe(&self, on_change: ChangeCallback) -> bool {
        *relock(&self.listener) = Some(on_change);
        true
    }
}

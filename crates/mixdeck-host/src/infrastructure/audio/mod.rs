//! Audio-session backend: the port to the OS per-process mixer.
//!
//! The host needs three things from the operating system: the list of
//! audio-producing processes with their volumes, a way to change a volume or
//! mute flag, and (where the OS offers it) a notification when something
//! else changes them.  The [`AudioBackend`] trait captures exactly that, so
//! the rest of the host never touches an OS audio API directly.
//!
//! # Native volume representation
//!
//! Most OS mixers store volume as a scalar in `0.0..=1.0`.  Backends report
//! that raw scalar in [`AudioSessionInfo`]; [`normalize_scalar`] converts it to
//! the `0..=100` integer the rest of MixDeck uses, rounding and clamping.
//!
//! # Change detection
//!
//! Backends that support notifications push changes through the callback
//! registered with [`AudioBackend::subscribe`].  Regardless, the host runs
//! [`run_poll_watcher`], which re-enumerates periodically and reconciles the
//! registry, so process start/exit is picked up even without notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mixdeck_core::{Field, Session, SessionId};
use thiserror::Error;
use tokio::time;
use tracing::{debug, warn};

use crate::application::session_registry::SharedRegistry;

pub mod simulated;

/// Error type for audio backend operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The session's process exited.
    #[error("{0} no longer exists")]
    SessionGone(SessionId),

    /// The OS audio API reported a failure.
    #[error("audio backend failure: {0}")]
    Backend(String),
}

/// One session as reported by the OS, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSessionInfo {
    pub id: SessionId,
    pub name: String,
    /// Native volume scalar in `0.0..=1.0`.
    pub scalar: f32,
    pub muted: bool,
}

impl AudioSessionInfo {
    /// Converts to the registry's representation.
    pub fn to_session(&self) -> Session {
        Session::new(
            self.id,
            &self.name,
            i32::from(normalize_scalar(self.scalar)),
            self.muted,
        )
    }
}

/// Maps a native `0.0..=1.0` volume scalar to `0..=100`.
///
/// Out-of-range and NaN inputs are clamped to the nearest bound (NaN to 0).
pub fn normalize_scalar(scalar: f32) -> u8 {
    if scalar.is_nan() {
        return 0;
    }
    (scalar.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Maps `0..=100` back to the native scalar.
pub fn to_scalar(volume: u8) -> f32 {
    f32::from(volume.min(100)) / 100.0
}

/// Callback invoked by the backend when a session field changes outside
/// MixDeck: `(id, field, value)`, with volume in `0..=100` and mute as `0|1`.
pub type ChangeCallback = Box<dyn Fn(SessionId, Field, i32) + Send + Sync>;

/// Trait abstracting the OS per-process audio mixer.
///
/// Implementations must be cheap to call from any thread; the host invokes
/// them from the link task and the watcher task.
#[cfg_attr(test, mockall::automock)]
pub trait AudioBackend: Send + Sync {
    /// Lists all audio sessions in a stable order.
    fn enumerate_sessions(&self) -> Result<Vec<AudioSessionInfo>, AudioError>;

    /// Sets the volume of one session (`0..=100`).
    fn set_volume(&self, id: SessionId, volume: u8) -> Result<(), AudioError>;

    /// Mutes or unmutes one session.
    fn set_mute(&self, id: SessionId, muted: bool) -> Result<(), AudioError>;

    /// Registers the change callback.  Returns `false` if this backend has no
    /// change notifications and relies on polling only.
    fn subscribe(&self, on_change: ChangeCallback) -> bool;
}

/// Wires backend change notifications into the registry.
pub fn subscribe_registry(backend: &dyn AudioBackend, registry: SharedRegistry) -> bool {
    let supported = backend.subscribe(Box::new(move |id, field, value| {
        if let Err(e) = registry.apply_external_change(id, field, value) {
            debug!("audio: ignoring change notification: {e}");
        }
    }));
    if !supported {
        debug!("audio: backend has no change notifications; polling only");
    }
    supported
}

/// Enumerates once and reconciles the registry.
///
/// # Errors
///
/// Propagates the backend's enumeration error; the registry is untouched.
pub fn refresh_registry(
    backend: &dyn AudioBackend,
    registry: &SharedRegistry,
) -> Result<usize, AudioError> {
    let sessions = backend
        .enumerate_sessions()?
        .iter()
        .map(AudioSessionInfo::to_session)
        .collect();
    Ok(registry.sync_from_backend(sessions))
}

/// Re-enumerates the backend every `interval` until `running` is cleared.
pub async fn run_poll_watcher(
    backend: Arc<dyn AudioBackend>,
    registry: SharedRegistry,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        match refresh_registry(backend.as_ref(), &registry) {
            Ok(0) => {}
            Ok(n) => debug!("audio poll: {n} registry change(s)"),
            Err(e) => warn!("audio poll failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scalar_rounds_to_nearest_percent() {
        assert_eq!(normalize_scalar(0.0), 0);
        assert_eq!(normalize_scalar(0.554), 55);
        assert_eq!(normalize_scalar(0.556), 56);
        assert_eq!(normalize_scalar(1.0), 100);
    }

    #[test]
    fn test_normalize_scalar_clamps_out_of_range() {
        assert_eq!(normalize_scalar(-0.3), 0);
        assert_eq!(normalize_scalar(1.7), 100);
        assert_eq!(normalize_scalar(f32::NAN), 0);
    }

    #[test]
    fn test_to_scalar_inverts_normalize() {
        for v in [0u8, 1, 40, 99, 100] {
            assert_eq!(normalize_scalar(to_scalar(v)), v);
        }
    }

    #[test]
    fn test_session_info_converts_with_name_budget() {
        let info = AudioSessionInfo {
            id: SessionId(4),
            name: "A very long application name.exe".to_string(),
            scalar: 0.4,
            muted: true,
        };
        let session = info.to_session();
        assert_eq!(session.volume, 40);
        assert!(session.muted);
        assert_eq!(session.name.chars().count(), 16);
    }

    #[test]
    fn test_refresh_registry_populates_from_backend() {
        // Arrange
        let mut backend = MockAudioBackend::new();
        backend.expect_enumerate_sessions().times(1).returning(|| {
            Ok(vec![AudioSessionInfo {
                id: SessionId(1),
                name: "Music".to_string(),
                scalar: 0.4,
                muted: false,
            }])
        });
        let registry = SharedRegistry::new();

        // Act
        let queued = refresh_registry(&backend, &registry).unwrap();

        // Assert
        assert_eq!(queued, 1);
        assert_eq!(registry.get(SessionId(1)).unwrap().volume, 40);
    }

    #[test]
    fn test_refresh_registry_leaves_registry_alone_on_error() {
        let mut backend = MockAudioBackend::new();
        backend
            .expect_enumerate_sessions()
            .returning(|| Err(AudioError::Backend("device lost".to_string())));
        let registry = SharedRegistry::new();
        registry.observe(Session::new(SessionId(1), "Music", 40, false));

        assert!(refresh_registry(&backend, &registry).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_poll_watcher_refreshes_until_stopped() {
        // Arrange – the first enumeration also clears the running flag
        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::clone(&running);
        let mut backend = MockAudioBackend::new();
        backend.expect_enumerate_sessions().times(1).returning(move || {
            stop.store(false, Ordering::Relaxed);
            Ok(vec![AudioSessionInfo {
                id: SessionId(3),
                name: "Browser".to_string(),
                scalar: 0.65,
                muted: false,
            }])
        });
        let registry = SharedRegistry::new();

        // Act
        tokio_test::block_on(run_poll_watcher(
            Arc::new(backend),
            registry.clone(),
            Duration::from_millis(1),
            running,
        ));

        // Assert
        assert_eq!(registry.get(SessionId(3)).unwrap().volume, 65);
    }

    #[test]
    fn test_subscribe_registry_routes_notifications() {
        // Arrange – capture the callback the backend receives
        let captured: Arc<std::sync::Mutex<Option<ChangeCallback>>> = Arc::default();
        let slot = Arc::clone(&captured);
        let mut backend = MockAudioBackend::new();
        backend.expect_subscribe().times(1).returning(move |cb| {
            *slot.lock().unwrap() = Some(cb);
            true
        });
        let registry = SharedRegistry::new();
        registry.observe(Session::new(SessionId(1), "Music", 40, false));

        // Act
        assert!(subscribe_registry(&backend, registry.clone()));
        let guard = captured.lock().unwrap();
        (guard.as_ref().unwrap())(SessionId(1), Field::Volume, 72);
        (guard.as_ref().unwrap())(SessionId(99), Field::Volume, 5);

        // Assert
        assert_eq!(registry.get(SessionId(1)).unwrap().volume, 72);
        assert_eq!(registry.len(), 1);
    }
}

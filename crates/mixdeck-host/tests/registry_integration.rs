//! Integration tests for the session registry and the audio backend bridge.
//!
//! These exercise the registry through its public API the same way the relay
//! and the audio watcher use it, with the in-memory `SimulatedBackend`
//! standing in for the OS mixer.

use std::sync::Arc;

use mixdeck_core::{clamp_volume, Field, Session, SessionId};
use mixdeck_host::application::session_registry::{
    RegistryChange, RegistryError, SessionRegistry, SharedRegistry,
};
use mixdeck_host::infrastructure::audio::simulated::SimulatedBackend;
use mixdeck_host::infrastructure::audio::{self, AudioSessionInfo};
use proptest::prelude::*;

fn info(id: u32, name: &str, scalar: f32) -> AudioSessionInfo {
    AudioSessionInfo {
        id: SessionId(id),
        name: name.to_string(),
        scalar,
        muted: false,
    }
}

fn music_and_call() -> SessionRegistry {
    let mut registry = SessionRegistry::new();
    registry.observe(Session::new(SessionId(1), "Music", 40, false));
    registry.observe(Session::new(SessionId(2), "Call", 80, false));
    registry.take_changes();
    registry
}

// ── Clamp law ─────────────────────────────────────────────────

proptest! {
    /// For any sequence of intents on a consistent registry, each session's
    /// volume equals the clamped value of the last intent for it.
    #[test]
    fn registry_volume_follows_clamp_law(
        intents in proptest::collection::vec((1u32..=2, any::<i32>()), 1..32)
    ) {
        let mut registry = music_and_call();
        let mut expected = [40u8, 80u8];

        for (id, requested) in &intents {
            registry.apply_intent(SessionId(*id), Field::Volume, *requested).unwrap();
            expected[(*id - 1) as usize] = clamp_volume(*requested);
            prop_assert_eq!(
                i32::from(registry.get(SessionId(*id)).unwrap().volume),
                (*requested).clamp(0, 100)
            );
        }

        prop_assert_eq!(registry.get(SessionId(1)).unwrap().volume, expected[0]);
        prop_assert_eq!(registry.get(SessionId(2)).unwrap().volume, expected[1]);
    }

    /// External changes obey the same clamp as intents.
    #[test]
    fn external_changes_are_clamped(requested in any::<i32>()) {
        let mut registry = music_and_call();
        let applied = registry.apply_external_change(SessionId(2), Field::Volume, requested).unwrap();
        prop_assert_eq!(applied, mixdeck_core::FieldChange::volume(requested));
        prop_assert!(registry.get(SessionId(2)).unwrap().volume <= 100);
    }
}

// ── Scenarios ─────────────────────────────────────────────────

#[test]
fn test_intent_on_two_session_registry_sets_volume_55() {
    // Arrange
    let mut registry = music_and_call();

    // Act
    registry.apply_intent(SessionId(1), Field::Volume, 55).unwrap();

    // Assert
    let list = registry.list();
    assert_eq!(list[0], Session::new(SessionId(1), "Music", 55, false));
    assert_eq!(list[1], Session::new(SessionId(2), "Call", 80, false));
    assert_eq!(
        registry.take_changes(),
        vec![RegistryChange::Updated {
            id: SessionId(1),
            change: mixdeck_core::FieldChange::Volume(55)
        }]
    );
}

#[test]
fn test_intent_after_process_exit_is_unknown_session() {
    let mut registry = music_and_call();
    registry.sync_from_backend(vec![Session::new(SessionId(1), "Music", 40, false)]);

    assert_eq!(
        registry.apply_intent(SessionId(2), Field::Volume, 10),
        Err(RegistryError::UnknownSession(SessionId(2)))
    );
    assert_eq!(registry.take_changes(), vec![RegistryChange::Removed(SessionId(2))]);
}

#[test]
fn test_simulated_backend_drives_registry_through_poll_and_callback() {
    // Arrange
    let backend = Arc::new(SimulatedBackend::new(vec![
        info(10, "Music", 0.4),
        info(11, "Call", 0.8),
    ]));
    let registry = SharedRegistry::new();
    audio::refresh_registry(backend.as_ref(), &registry).unwrap();
    audio::subscribe_registry(backend.as_ref(), registry.clone());
    registry.take_changes();

    // Act – a change notification, then a process start and exit seen by polling
    backend.set_external_volume(SessionId(10), 0.9);
    backend.spawn_process(info(12, "Game", 0.5));
    backend.exit_process(SessionId(11));
    audio::refresh_registry(backend.as_ref(), &registry).unwrap();

    // Assert
    let ids: Vec<_> = registry.list().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![SessionId(10), SessionId(12)]);
    assert_eq!(registry.get(SessionId(10)).unwrap().volume, 90);
    assert_eq!(
        registry.take_changes(),
        vec![
            RegistryChange::Updated {
                id: SessionId(10),
                change: mixdeck_core::FieldChange::Volume(90)
            },
            RegistryChange::Removed(SessionId(11)),
            RegistryChange::Added(Session::new(SessionId(12), "Game", 50, false)),
        ]
    );
}

#[test]
fn test_concurrent_writers_never_lose_a_session() {
    // Arrange
    let registry = SharedRegistry::new();
    for id in 0..8 {
        registry.observe(Session::new(SessionId(id), "app", 50, false));
    }

    // Act – hammer from several threads, each with its own session
    let handles: Vec<_> = (0..8)
        .map(|id| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for v in 0..200 {
                    registry
                        .apply_external_change(SessionId(id), Field::Volume, v)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Assert
    assert_eq!(registry.len(), 8);
    for session in registry.list() {
        assert_eq!(session.volume, 100);
    }
}

//! End-to-end tests: the device control loop talking to the host relay.
//!
//! `MemorySerial` is the cable.  Each step of [`Bench::step`] runs one device
//! iteration, hands the device's bytes to the host, lets the host push its
//! registry changes and timers, and queues the host's reply for the next
//! device iteration.  The host's audio backend is the in-memory
//! `SimulatedBackend`, so the tests can make processes exit or other
//! applications change volumes.

use std::sync::Arc;

use mixdeck_core::hid::consumer::RELEASE_REPORT;
use mixdeck_core::{Field, FieldChange, LinkState, MediaKey, SessionId, SyncMessage, Tick};
use mixdeck_device::application::control_loop::{DeviceApp, Peripherals};
use mixdeck_device::application::input::PressClass;
use mixdeck_device::application::reconciler::{EditSource, InputReconciler, ReconcilerConfig};
use mixdeck_device::application::ui::LinkIndicator;
use mixdeck_device::config::DeviceConfig;
use mixdeck_device::infrastructure::peripherals::mock::{
    MemorySerial, QueueButton, QueueEncoder, QueueTouch, RecordingHid, RecordingSurface,
};
use mixdeck_host::application::relay::HostRelay;
use mixdeck_host::application::session_registry::SharedRegistry;
use mixdeck_host::infrastructure::audio::simulated::SimulatedBackend;
use mixdeck_host::infrastructure::audio::{self, AudioSessionInfo};
use proptest::prelude::*;

// ── Bench ─────────────────────────────────────────────────────────────────────

struct Bench {
    app: DeviceApp,
    serial: MemorySerial,
    button: QueueButton,
    hid: RecordingHid,
    host: HostRelay,
    registry: SharedRegistry,
    backend: Arc<SimulatedBackend>,
    now: Tick,
}

fn info(id: u32, name: &str, scalar: f32) -> AudioSessionInfo {
    AudioSessionInfo {
        id: SessionId(id),
        name: name.to_string(),
        scalar,
        muted: false,
    }
}

impl Bench {
    /// Music at 40 and Call at 80, cable unplugged.
    fn new() -> Self {
        let backend = Arc::new(SimulatedBackend::new(vec![
            info(1, "Music", 0.4),
            info(2, "Call", 0.8),
        ]));
        let registry = SharedRegistry::new();
        audio::refresh_registry(backend.as_ref(), &registry).unwrap();
        registry.take_changes();

        let config = DeviceConfig::default();
        let host = HostRelay::new(registry.clone(), backend.clone(), config.sync);

        let serial = MemorySerial::new();
        let button = QueueButton::default();
        let hid = RecordingHid::default();
        let app = DeviceApp::new(
            config,
            Peripherals {
                serial: Box::new(serial.clone()),
                touch: Box::new(QueueTouch::default()),
                encoder: Box::new(QueueEncoder::default()),
                button: Box::new(button.clone()),
                display: Box::new(RecordingSurface::default()),
                hid: Box::new(hid.clone()),
            },
        );

        Self {
            app,
            serial,
            button,
            hid,
            host,
            registry,
            backend,
            now: 0,
        }
    }

    fn plug_in(&mut self) {
        self.serial.set_open(true);
        self.host.connect(self.now);
    }

    fn unplug(&mut self) {
        self.serial.set_open(false);
        self.host.disconnect();
    }

    /// Runs the device alone for one iteration; nothing reaches the host.
    fn device_only(&mut self) {
        self.now += 1;
        self.app.poll_once(self.now);
    }

    /// One round trip across the cable.
    fn step(&mut self) {
        self.now += 1;
        self.app.poll_once(self.now);
        self.host.on_bytes(&self.serial.take_outbound(), self.now);
        self.host.push_registry_changes();
        self.host.tick(self.now);
        self.serial.push_inbound(&self.host.take_outbound_bytes());
    }

    fn run(&mut self, steps: usize) {
        for _ in 0..steps {
            self.step();
        }
    }

    fn synchronized() -> Self {
        let mut bench = Self::new();
        bench.plug_in();
        bench.run(4);
        assert_eq!(bench.app.link_state(), LinkState::Synchronized);
        assert_eq!(bench.host.state(), LinkState::Synchronized);
        bench
    }

    fn shown_volume(&self, id: u32) -> Option<u8> {
        self.app
            .reconciler()
            .shadow()
            .get(SessionId(id))
            .map(|e| e.session.volume)
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_handshake_mirrors_host_sessions() {
    // Arrange
    let mut bench = Bench::new();

    // Act
    bench.plug_in();
    bench.run(4);

    // Assert
    assert_eq!(bench.app.link_state(), LinkState::Synchronized);
    assert_eq!(bench.app.indicator(), LinkIndicator::Online);
    assert_eq!(bench.app.reconciler().shadow().len(), 2);
    assert_eq!(bench.shown_volume(1), Some(40));
    assert_eq!(bench.shown_volume(2), Some(80));
}

#[test]
fn test_touch_intent_reaches_backend_and_is_acked() {
    // Arrange
    let mut bench = Bench::synchronized();

    // Act
    bench
        .app
        .reconciler_mut()
        .propose(SessionId(1), FieldChange::Volume(55), EditSource::Touch);
    bench.run(3);

    // Assert
    assert_eq!(bench.registry.get(SessionId(1)).unwrap().volume, 55);
    assert!(bench
        .backend
        .writes()
        .contains(&(SessionId(1), Field::Volume, 55)));
    assert!(!bench.app.reconciler().is_dirty(SessionId(1), Field::Volume));
    assert_eq!(bench.shown_volume(1), Some(55));
    assert_eq!(bench.app.engine().pending_count(), 0);
}

#[test]
fn test_external_change_reaches_device() {
    // Arrange
    let mut bench = Bench::synchronized();

    // Act
    bench.backend.set_external_volume(SessionId(2), 0.25);
    audio::refresh_registry(bench.backend.as_ref(), &bench.registry).unwrap();
    bench.run(3);

    // Assert
    assert_eq!(bench.shown_volume(2), Some(25));
}

#[test]
fn test_unplugging_drops_pending_intents() {
    // Arrange
    let mut bench = Bench::synchronized();
    let reconciler = bench.app.reconciler_mut();
    reconciler.propose(SessionId(1), FieldChange::Volume(10), EditSource::Touch);
    reconciler.propose(SessionId(2), FieldChange::Volume(20), EditSource::Touch);
    reconciler.propose_mute_toggle(SessionId(1));
    bench.device_only();
    assert_eq!(bench.app.engine().pending_count(), 3);

    // Act
    bench.unplug();
    bench.device_only();

    // Assert
    assert_eq!(bench.app.link_state(), LinkState::Disconnected);
    assert_eq!(bench.app.indicator(), LinkIndicator::Disconnected);
    assert_eq!(bench.app.engine().pending_count(), 0);
    assert_eq!(bench.app.reconciler().dirty_count(), 0);
    assert!(bench.app.reconciler().shadow().is_empty());
    assert_eq!(bench.host.state(), LinkState::Disconnected);
    // The host never saw the intents.
    assert_eq!(bench.registry.get(SessionId(1)).unwrap().volume, 40);
}

#[test]
fn test_reconnect_gets_fresh_snapshot() {
    // Arrange
    let mut bench = Bench::synchronized();
    bench.unplug();
    bench.device_only();
    // Changes made while unplugged.
    bench.backend.set_external_volume(SessionId(1), 0.9);
    bench.backend.spawn_process(info(3, "Browser", 0.5));
    audio::refresh_registry(bench.backend.as_ref(), &bench.registry).unwrap();

    // Act
    bench.plug_in();
    bench.run(4);

    // Assert
    assert_eq!(bench.app.link_state(), LinkState::Synchronized);
    assert_eq!(bench.app.reconciler().shadow().len(), 3);
    assert_eq!(bench.shown_volume(1), Some(90));
    assert_eq!(bench.shown_volume(3), Some(50));
}

#[test]
fn test_session_exit_while_dirty_is_silent() {
    // Arrange
    let mut bench = Bench::synchronized();
    bench.app.reconciler_mut().select(SessionId(2));
    bench
        .app
        .reconciler_mut()
        .propose(SessionId(2), FieldChange::Volume(30), EditSource::Touch);
    bench.device_only();
    assert!(bench.app.reconciler().is_dirty(SessionId(2), Field::Volume));

    // Act
    bench.backend.exit_process(SessionId(2));
    audio::refresh_registry(bench.backend.as_ref(), &bench.registry).unwrap();
    bench.host.on_bytes(&bench.serial.take_outbound(), bench.now);
    bench.run(3);

    // Assert
    assert_eq!(bench.app.link_state(), LinkState::Synchronized);
    assert!(bench.app.reconciler().shadow().get(SessionId(2)).is_none());
    assert!(!bench.app.reconciler().is_dirty(SessionId(2), Field::Volume));
    assert_eq!(bench.app.reconciler().selected(), None);
    assert_eq!(bench.app.reconciler().shadow().len(), 1);
    assert!(bench.registry.get(SessionId(2)).is_none());
}

#[test]
fn test_media_key_is_logged_by_host_without_breaking_sync() {
    let mut bench = Bench::synchronized();

    bench.button.push(PressClass::Short);
    bench.run(2);

    assert_eq!(
        bench.hid.reports(),
        vec![MediaKey::PlayPause.press_report(), RELEASE_REPORT]
    );
    assert_eq!(bench.host.state(), LinkState::Synchronized);
    assert_eq!(bench.app.link_state(), LinkState::Synchronized);
    assert_eq!(bench.host.pending_count(), 0);
}

// ── Dirty masking ─────────────────────────────────────────────────────────────

proptest! {
    /// While an edit is in flight, host deltas never overwrite the local
    /// value.  Once the field is released, by Ack or by debounce, the last
    /// host value is shown.
    #[test]
    fn dirty_field_masks_host_deltas(
        local in (0u8..=100).prop_filter("must differ from the host value", |v| *v != 40),
        deltas in proptest::collection::vec(0u8..=100, 1..16),
        acked in any::<bool>(),
    ) {
        let config = ReconcilerConfig::default();
        let mut reconciler = InputReconciler::new(config);
        reconciler.on_message(SyncMessage::FullSnapshot(vec![
            mixdeck_core::Session::new(SessionId(1), "Music", 40, false),
        ]));

        reconciler.propose(SessionId(1), FieldChange::Volume(local), EditSource::Touch);
        prop_assert_eq!(reconciler.commit(1).len(), 1);
        reconciler.intent_sent(SessionId(1), Field::Volume, 7);

        for value in &deltas {
            reconciler.on_message(SyncMessage::Delta {
                id: SessionId(1),
                change: FieldChange::Volume(*value),
            });
            let shown = reconciler.shadow().get(SessionId(1)).unwrap().session.volume;
            prop_assert_eq!(shown, local);
        }

        if acked {
            reconciler.on_acked(7);
        } else {
            reconciler.tick(1 + config.dirty_debounce_ticks);
        }
        let shown = reconciler.shadow().get(SessionId(1)).unwrap().session.volume;
        prop_assert_eq!(Some(&shown), deltas.last());
        prop_assert!(!reconciler.is_dirty(SessionId(1), Field::Volume));
    }
}

//! HostRelay: drives the host end of one serial link.
//!
//! The relay is the glue between three things that know nothing about each
//! other:
//!
//! - the [`LinkEngine`] (sequencing, Acks, retries, link state),
//! - the [`SharedRegistry`] (what the sessions currently look like),
//! - the [`AudioBackend`] (what the OS mixer should be told).
//!
//! It owns no I/O.  The serial task feeds it raw bytes and clock ticks and
//! writes out whatever [`HostRelay::take_outbound_bytes`] returns, which keeps
//! every decision here unit-testable.
//!
//! # Intent handling
//!
//! ```text
//! Intent(id, field, value)
//!   └─ registry.apply_intent        (validate + clamp, lock released)
//!        ├─ UnknownSession  → Nack(UnknownSession)
//!        └─ accepted
//!             └─ backend.set_volume / set_mute
//!                  ├─ Ok            → Ack, then the change is pushed as a Delta
//!                  ├─ SessionGone   → Nack(UnknownSession) + SessionRemoved
//!                  └─ other error   → registry reverted, Nack(Rejected)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use mixdeck_core::domain::shadow::MAX_SNAPSHOT_SESSIONS;
use mixdeck_core::protocol::codec::fit_snapshot;
use mixdeck_core::{
    decode_message, encode_framed, FieldChange, FrameDecoder, LinkEngine, LinkEvent, LinkRole,
    LinkState, NackReason, SessionId, SyncMessage, SyncTimings, Tick,
};
use tracing::{debug, info, trace, warn};

use crate::application::session_registry::{RegistryChange, RegistryError, SharedRegistry};
use crate::infrastructure::audio::{AudioBackend, AudioError};

/// Host side of one device link.
pub struct HostRelay {
    engine: LinkEngine,
    decoder: FrameDecoder,
    registry: SharedRegistry,
    backend: Arc<dyn AudioBackend>,
}

impl HostRelay {
    pub fn new(
        registry: SharedRegistry,
        backend: Arc<dyn AudioBackend>,
        timings: SyncTimings,
    ) -> Self {
        Self {
            engine: LinkEngine::new(LinkRole::Host, timings),
            decoder: FrameDecoder::new(),
            registry,
            backend,
        }
    }

    pub fn state(&self) -> LinkState {
        self.engine.state()
    }

    /// Number of host→device messages still waiting for an Ack.
    pub fn pending_count(&self) -> usize {
        self.engine.pending_count()
    }

    /// The transport came up; wait for the device's `Hello`.
    pub fn connect(&mut self, now: Tick) {
        self.decoder.reset();
        let events = self.engine.on_transport_up(now);
        self.handle(events);
    }

    /// The transport was lost; everything in flight is dropped.
    pub fn disconnect(&mut self) {
        self.decoder.reset();
        let events = self.engine.on_transport_lost();
        self.handle(events);
    }

    /// Feeds bytes read from the link.
    pub fn on_bytes(&mut self, bytes: &[u8], now: Tick) {
        self.decoder.feed(bytes);
        while let Some(payload) = self.decoder.next_payload() {
            match decode_message(&payload) {
                Ok(envelope) => {
                    let events = self.engine.receive(envelope, now);
                    self.handle(events);
                }
                Err(e) => debug!("dropping undecodable payload: {e}"),
            }
        }
    }

    /// Advances link timers.
    pub fn tick(&mut self, now: Tick) {
        let events = self.engine.tick(now);
        self.handle(events);
    }

    /// Pushes queued registry changes to the device.
    ///
    /// While no snapshot has been sent yet the changes are dropped: the
    /// snapshot that follows the handshake already contains them.
    pub fn push_registry_changes(&mut self) {
        if self.engine.state() == LinkState::Disconnected {
            return;
        }
        for change in self.registry.take_changes() {
            let message = match change {
                RegistryChange::Added(session) => SyncMessage::SessionAdded(session),
                RegistryChange::Updated { id, change } => SyncMessage::Delta { id, change },
                RegistryChange::Removed(id) => SyncMessage::SessionRemoved(id),
            };
            if self.engine.send_reliable(message).is_none() {
                trace!("registry change left for the next snapshot");
            }
        }
        let events = self.engine.take_events();
        self.handle(events);
    }

    /// Encodes and frames everything the engine wants to send.
    pub fn take_outbound_bytes(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for envelope in self.engine.drain_outbox() {
            match encode_framed(&envelope) {
                Ok(frame) => out.extend(frame),
                Err(e) => warn!("cannot encode msg {}: {e}", envelope.msg_id),
            }
        }
        out
    }

    // ── Event handling ────────────────────────────────────────────────────────

    fn handle(&mut self, events: Vec<LinkEvent>) {
        let mut queue: VecDeque<LinkEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            match event {
                LinkEvent::SnapshotNeeded => {
                    self.send_snapshot();
                    queue.extend(self.engine.take_events());
                }
                LinkEvent::Deliver { msg_id, message } => self.on_message(msg_id, message),
                LinkEvent::Nacked { msg_id, reason } => {
                    warn!("device rejected msg {msg_id}: {reason:?}");
                }
                LinkEvent::Expired(msg_id) => debug!("msg {msg_id} given up"),
                LinkEvent::Acked(_) | LinkEvent::StateChanged { .. } => {}
            }
        }
    }

    fn send_snapshot(&mut self) {
        let sessions = self.registry.snapshot();
        let fitted = fit_snapshot(&sessions);
        let fitted = &fitted[..fitted.len().min(MAX_SNAPSHOT_SESSIONS)];
        if fitted.len() < sessions.len() {
            warn!(
                "snapshot carries {} of {} sessions",
                fitted.len(),
                sessions.len()
            );
        }
        debug!("sending snapshot of {} session(s)", fitted.len());
        self.engine
            .send_reliable(SyncMessage::FullSnapshot(fitted.to_vec()));
    }

    fn on_message(&mut self, msg_id: u16, message: SyncMessage) {
        match message {
            SyncMessage::Intent { id, change } => self.on_intent(msg_id, id, change),
            SyncMessage::MediaKey(key) => info!("device sent media key {}", key.label()),
            other => debug!("ignoring {:?} from device", other.message_type()),
        }
    }

    fn on_intent(&mut self, msg_id: u16, id: SessionId, change: FieldChange) {
        let (field, value) = change.to_wire();
        let previous = self.registry.get(id).map(|s| s.value_of(field));

        let applied = match self.registry.apply_intent(id, field, i32::from(value)) {
            Ok(applied) => applied,
            Err(RegistryError::UnknownSession(_)) => {
                debug!("intent {msg_id} for unknown {id}");
                self.engine.reject(msg_id, NackReason::UnknownSession);
                return;
            }
        };

        // The registry lock is released here; the backend call may be slow.
        let forwarded = match applied {
            FieldChange::Volume(v) => self.backend.set_volume(id, v),
            FieldChange::Muted(m) => self.backend.set_mute(id, m),
        };

        match forwarded {
            Ok(()) => {
                debug!("intent {msg_id}: {id} {applied:?}");
                self.engine.acknowledge(msg_id);
            }
            Err(AudioError::SessionGone(_)) => {
                info!("{id} exited before intent {msg_id} could be applied");
                self.registry.remove(id);
                self.engine.reject(msg_id, NackReason::UnknownSession);
            }
            Err(e) => {
                warn!("intent {msg_id} for {id} failed: {e}");
                if let Some(previous) = previous {
                    let (field, value) = previous.to_wire();
                    // The session may have vanished meanwhile; nothing to revert then.
                    let _ = self
                        .registry
                        .apply_external_change(id, field, i32::from(value));
                }
                self.engine.reject(msg_id, NackReason::Rejected);
            }
        }
        self.push_registry_changes();
    }
}

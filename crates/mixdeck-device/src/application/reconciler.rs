//! Device input reconciler.
//!
//! Merges two streams of changes into one coherent `ShadowCache`:
//!
//! - **local edits** from the touch slider, the mute toggle, and the encoder,
//!   which are shown immediately and sent to the host as `Intent`s;
//! - **inbound updates** from the host (`FullSnapshot`, `Delta`,
//!   `SessionAdded`, `SessionRemoved`).
//!
//! # The dirty-field policy (for beginners)
//!
//! While the user drags a slider, the host keeps echoing older values back.
//! Applying them would make the slider jump under the finger.  So a local
//! edit marks its `(session, field)` *dirty*, and while it is dirty inbound
//! `Delta`s for that field are buffered instead of applied.
//!
//! A dirty field is released by whichever happens first:
//!
//! 1. The host acknowledges the *latest* `Intent` for the field.  The host
//!    now holds our value, so anything buffered before the `Ack` is older
//!    than it and is discarded.
//! 2. No input touched the field for `dirty_debounce_ticks`.  The buffered
//!    value (the host's latest word) is applied.
//! 3. The `Intent` was rejected (`Nack`) or expired.  The buffered value is
//!    applied, and the next snapshot corrects anything else.
//!
//! # Source priority
//!
//! Edits are first *proposed* and then *committed* once per loop iteration.
//! Competing proposals for the same field within one iteration resolve
//! Touch > Encoder; across iterations the last writer wins.  Inbound `Delta`s
//! rank lowest because they are masked while the field is dirty.

use std::collections::HashMap;

use mixdeck_core::{Field, FieldChange, Session, SessionId, ShadowCache, SyncMessage, Tick};
use tracing::{debug, trace};

use crate::config::DeviceConfig;

/// Origin of a local edit.  Later variants win within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EditSource {
    Encoder,
    Touch,
}

/// Steps and windows used by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub slider_step: u8,
    pub encoder_step: u8,
    pub dirty_debounce_ticks: Tick,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig::from(&DeviceConfig::default())
    }
}

impl From<&DeviceConfig> for ReconcilerConfig {
    fn from(cfg: &DeviceConfig) -> Self {
        Self {
            slider_step: cfg.slider_step,
            encoder_step: cfg.encoder_step,
            dirty_debounce_ticks: cfg.dirty_debounce_ticks,
        }
    }
}

/// Rounds a volume to the nearest multiple of `step`, staying within `0..=100`.
///
/// # Examples
///
/// ```rust
/// use mixdeck_device::application::reconciler::quantize;
///
/// assert_eq!(quantize(55, 2), 56);
/// assert_eq!(quantize(54, 2), 54);
/// assert_eq!(quantize(99, 2), 100);
/// ```
pub fn quantize(value: u8, step: u8) -> u8 {
    let value = u16::from(value.min(100));
    if step <= 1 {
        return value as u8;
    }
    let step = u16::from(step);
    let rounded = (value + step / 2) / step * step;
    rounded.min(100) as u8
}

/// Bookkeeping for one dirty `(id, field)`.
#[derive(Debug, Clone, Copy)]
struct DirtyEdit {
    local: FieldChange,
    last_input: Tick,
    /// `msg_id` of the most recent `Intent` carrying `local`.
    intent: Option<u16>,
    /// Latest host value received while dirty.
    buffered: Option<FieldChange>,
}

#[derive(Debug, Clone, Copy)]
struct Proposal {
    id: SessionId,
    change: FieldChange,
    source: EditSource,
}

/// Owns the shadow cache and the selection, and applies the dirty-field policy.
#[derive(Debug)]
pub struct InputReconciler {
    config: ReconcilerConfig,
    shadow: ShadowCache,
    edits: HashMap<(SessionId, Field), DirtyEdit>,
    proposals: Vec<Proposal>,
    selected: Option<SessionId>,
}

impl InputReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            shadow: ShadowCache::new(),
            edits: HashMap::new(),
            proposals: Vec::new(),
            selected: None,
        }
    }

    pub fn shadow(&self) -> &ShadowCache {
        &self.shadow
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    // ── Selection ─────────────────────────────────────────────────────────────

    pub fn selected(&self) -> Option<SessionId> {
        self.selected
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.selected
            .and_then(|id| self.shadow.get(id))
            .map(|e| &e.session)
    }

    /// Selects a session.  Returns `false` (and keeps the old selection) for
    /// an id the shadow does not hold.
    pub fn select(&mut self, id: SessionId) -> bool {
        if self.shadow.get(id).is_none() {
            return false;
        }
        self.selected = Some(id);
        true
    }

    /// Selects the session shown at list position `index`.
    pub fn select_index(&mut self, index: usize) -> bool {
        let id = self.shadow.iter().nth(index).map(|e| e.session.id);
        match id {
            Some(id) => self.select(id),
            None => false,
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    // ── Dirty state queries ───────────────────────────────────────────────────

    pub fn is_dirty(&self, id: SessionId, field: Field) -> bool {
        self.edits.contains_key(&(id, field))
    }

    /// The host value held back for a dirty field, if any.
    pub fn buffered(&self, id: SessionId, field: Field) -> Option<FieldChange> {
        self.edits.get(&(id, field)).and_then(|e| e.buffered)
    }

    /// Number of dirty fields.
    pub fn dirty_count(&self) -> usize {
        self.edits.len()
    }

    // ── Local edits ───────────────────────────────────────────────────────────

    /// Proposes an absolute change for this iteration.
    ///
    /// Stale ids are dropped silently.
    pub fn propose(&mut self, id: SessionId, change: FieldChange, source: EditSource) {
        if self.shadow.get(id).is_none() {
            trace!("ignoring edit for stale {id}");
            return;
        }
        let field = change.field();
        match self
            .proposals
            .iter_mut()
            .find(|p| p.id == id && p.change.field() == field)
        {
            Some(existing) if source >= existing.source => {
                existing.change = change;
                existing.source = source;
            }
            Some(_) => trace!("{source:?} edit on {id} loses to an earlier touch"),
            None => self.proposals.push(Proposal { id, change, source }),
        }
    }

    /// Proposes a slider position already mapped to `0..=100`.
    pub fn propose_slider(&mut self, id: SessionId, raw_volume: u8) {
        let volume = quantize(raw_volume, self.config.slider_step);
        self.propose(id, FieldChange::Volume(volume), EditSource::Touch);
    }

    /// Proposes `detents` encoder steps relative to the current value.
    pub fn propose_encoder(&mut self, id: SessionId, detents: i8) {
        let Some(FieldChange::Volume(base)) = self.current_value(id, Field::Volume) else {
            return;
        };
        let step = i32::from(self.config.encoder_step) * i32::from(detents);
        self.propose(
            id,
            FieldChange::volume(i32::from(base) + step),
            EditSource::Encoder,
        );
    }

    /// Proposes flipping the mute flag.
    pub fn propose_mute_toggle(&mut self, id: SessionId) {
        if let Some(FieldChange::Muted(muted)) = self.current_value(id, Field::Muted) {
            self.propose(id, FieldChange::Muted(!muted), EditSource::Touch);
        }
    }

    /// The value the field will have after this iteration's proposals.
    fn current_value(&self, id: SessionId, field: Field) -> Option<FieldChange> {
        self.proposals
            .iter()
            .find(|p| p.id == id && p.change.field() == field)
            .map(|p| p.change)
            .or_else(|| self.shadow.get(id).map(|e| e.session.value_of(field)))
    }

    /// Applies this iteration's winning proposals to the shadow and marks
    /// them dirty.
    ///
    /// Returns the changes to send as `Intent`s.  A proposal that does not
    /// change the value only refreshes its field's inactivity timer.
    pub fn commit(&mut self, now: Tick) -> Vec<(SessionId, FieldChange)> {
        let mut intents = Vec::new();
        for p in std::mem::take(&mut self.proposals) {
            let key = (p.id, p.change.field());
            if !self.shadow.apply(p.id, p.change) {
                if let Some(edit) = self.edits.get_mut(&key) {
                    edit.last_input = now;
                }
                continue;
            }
            let edit = self.edits.entry(key).or_insert(DirtyEdit {
                local: p.change,
                last_input: now,
                intent: None,
                buffered: None,
            });
            edit.local = p.change;
            edit.last_input = now;
            self.shadow.set_dirty(key.0, key.1, true);
            intents.push((p.id, p.change));
        }
        intents
    }

    /// Records the `msg_id` the engine assigned to an `Intent`.
    pub fn intent_sent(&mut self, id: SessionId, field: Field, msg_id: u16) {
        if let Some(edit) = self.edits.get_mut(&(id, field)) {
            edit.intent = Some(msg_id);
        }
    }

    // ── Acknowledgements ──────────────────────────────────────────────────────

    fn key_for_intent(&self, msg_id: u16) -> Option<(SessionId, Field)> {
        self.edits
            .iter()
            .find(|(_, e)| e.intent == Some(msg_id))
            .map(|(key, _)| *key)
    }

    /// The host accepted an `Intent`.
    ///
    /// Only the latest intent of a field releases it.  A host value that
    /// arrived while the field was dirty is newer than the acked edit and is
    /// applied.  A repeated `Ack` finds nothing and has no effect.
    pub fn on_acked(&mut self, msg_id: u16) {
        if let Some(key) = self.key_for_intent(msg_id) {
            self.release(key);
        }
    }

    /// The host rejected an `Intent`, or it expired unacknowledged.
    pub fn on_intent_failed(&mut self, msg_id: u16) {
        if let Some(key) = self.key_for_intent(msg_id) {
            self.release(key);
        }
    }

    fn release(&mut self, key: (SessionId, Field)) {
        let Some(edit) = self.edits.remove(&key) else {
            return;
        };
        self.shadow.set_dirty(key.0, key.1, false);
        if let Some(change) = edit.buffered {
            trace!("{} {:?}: applying buffered {change:?}", key.0, key.1);
            self.shadow.apply(key.0, change);
        }
    }

    /// Releases fields idle for at least the debounce window.
    pub fn tick(&mut self, now: Tick) {
        let window = self.config.dirty_debounce_ticks;
        let idle: Vec<_> = self
            .edits
            .iter()
            .filter(|(_, e)| now.saturating_sub(e.last_input) >= window)
            .map(|(key, _)| *key)
            .collect();
        for key in idle {
            self.release(key);
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Merges one delivered host message into the shadow.
    pub fn on_message(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::FullSnapshot(sessions) => self.on_snapshot(sessions),
            SyncMessage::Delta { id, change } => {
                if let Some(edit) = self.edits.get_mut(&(id, change.field())) {
                    trace!("{id} is dirty, buffering {change:?}");
                    edit.buffered = Some(change);
                } else {
                    self.shadow.apply(id, change);
                }
            }
            SyncMessage::SessionAdded(session) => {
                let id = session.id;
                if !self.shadow.upsert(session) {
                    debug!("shadow cache full, not showing {id}");
                }
            }
            SyncMessage::SessionRemoved(id) => {
                if self.shadow.remove(id).is_some() {
                    debug!("{id} removed by host");
                }
                self.edits.retain(|(edit_id, _), _| *edit_id != id);
                self.proposals.retain(|p| p.id != id);
                if self.selected == Some(id) {
                    self.selected = None;
                }
            }
            other => trace!("reconciler ignores {:?}", other.message_type()),
        }
    }

    /// Replaces the shadow wholesale.  Dirty fields of surviving sessions keep
    /// their local value; the snapshot's value becomes their buffered value.
    fn on_snapshot(&mut self, sessions: Vec<Session>) {
        self.shadow.replace_all(sessions);

        let keys: Vec<_> = self.edits.keys().copied().collect();
        for key in keys {
            let Some(host_value) = self.shadow.get(key.0).map(|e| e.session.value_of(key.1))
            else {
                self.edits.remove(&key);
                continue;
            };
            if let Some(edit) = self.edits.get_mut(&key) {
                edit.buffered = Some(host_value);
                let local = edit.local;
                self.shadow.apply(key.0, local);
                self.shadow.set_dirty(key.0, key.1, true);
            }
        }

        if let Some(id) = self.selected {
            if self.shadow.get(id).is_none() {
                self.selected = None;
            }
        }
    }

    /// The link entered `Resyncing`: the current generation is no longer
    /// trusted, but entries stay visible until the next snapshot.
    pub fn on_resync(&mut self) {
        self.shadow.invalidate();
    }

    /// The transport is gone.  Nothing survives into the next handshake.
    pub fn on_link_lost(&mut self) {
        self.shadow.clear();
        self.edits.clear();
        self.proposals.clear();
        self.selected = None;
    }
}

impl Default for InputReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

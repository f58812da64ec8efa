//! Device-side replica of the host's session registry.
//!
//! The `ShadowCache` is never authoritative.  It is rebuilt from protocol
//! messages only: a `FullSnapshot` replaces it wholesale, and `Delta`,
//! `SessionAdded`, and `SessionRemoved` patch it incrementally.
//!
//! # Generation counter
//!
//! Every applied update increments `generation`.  The UI compares the value
//! it last rendered against the current one to decide whether a redraw is
//! needed, which keeps SPI traffic to a minimum on the device.
//!
//! # Dirty flags
//!
//! Each entry carries a per-field dirty flag meaning "the device has a local
//! edit for this field that the host has not acknowledged yet".  The cache
//! only stores the flags; the policy that sets and clears them lives in the
//! device's input reconciler.

use crate::domain::session::{Field, FieldChange, Session, SessionId};

/// Maximum number of sessions the device keeps (bounded memory).
pub const MAX_SNAPSHOT_SESSIONS: usize = 32;

/// Per-field dirty flags of one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFields {
    pub volume: bool,
    pub muted: bool,
}

impl DirtyFields {
    fn get(&self, field: Field) -> bool {
        match field {
            Field::Volume => self.volume,
            Field::Muted => self.muted,
        }
    }

    fn set(&mut self, field: Field, dirty: bool) {
        match field {
            Field::Volume => self.volume = dirty,
            Field::Muted => self.muted = dirty,
        }
    }

    /// Returns `true` if any field is dirty.
    pub fn any(&self) -> bool {
        self.volume || self.muted
    }
}

/// One cached session plus its dirty flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowEntry {
    pub session: Session,
    pub dirty: DirtyFields,
}

/// Ordered, bounded replica of the host's session list.
#[derive(Debug, Clone)]
pub struct ShadowCache {
    entries: Vec<ShadowEntry>,
    generation: u64,
    synced: bool,
    capacity: usize,
}

impl ShadowCache {
    /// Creates an empty cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_SNAPSHOT_SESSIONS)
    }

    /// Creates an empty cache that holds at most `capacity` sessions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            generation: 0,
            synced: false,
            capacity,
        }
    }

    /// Monotonic counter bumped on every applied update.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` once a `FullSnapshot` has been applied and not invalidated since.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in host first-observed order.
    pub fn iter(&self) -> impl Iterator<Item = &ShadowEntry> {
        self.entries.iter()
    }

    pub fn get(&self, id: SessionId) -> Option<&ShadowEntry> {
        self.entries.iter().find(|e| e.session.id == id)
    }

    /// Zero-based display position of `id`.
    pub fn position(&self, id: SessionId) -> Option<usize> {
        self.entries.iter().position(|e| e.session.id == id)
    }

    fn get_mut(&mut self, id: SessionId) -> Option<&mut ShadowEntry> {
        self.entries.iter_mut().find(|e| e.session.id == id)
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Replaces the whole cache with a snapshot.  All dirty flags are cleared.
    ///
    /// Sessions beyond the capacity are dropped.
    pub fn replace_all(&mut self, sessions: Vec<Session>) {
        self.entries = sessions
            .into_iter()
            .take(self.capacity)
            .map(|session| ShadowEntry {
                session,
                dirty: DirtyFields::default(),
            })
            .collect();
        self.synced = true;
        self.bump();
    }

    /// Inserts a new session at the end, or replaces an existing one in place.
    ///
    /// Returns `false` when the cache is full and `session` is new.
    pub fn upsert(&mut self, session: Session) -> bool {
        if let Some(entry) = self.get_mut(session.id) {
            entry.session = session;
        } else {
            if self.entries.len() >= self.capacity {
                return false;
            }
            self.entries.push(ShadowEntry {
                session,
                dirty: DirtyFields::default(),
            });
        }
        self.bump();
        true
    }

    /// Removes a session.  Unknown ids are ignored.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let pos = self.position(id)?;
        let entry = self.entries.remove(pos);
        self.bump();
        Some(entry.session)
    }

    /// Applies a field change.
    ///
    /// Returns `false` (silently) for a stale id, and also when the value was
    /// already equal; the generation only moves on a real change.
    pub fn apply(&mut self, id: SessionId, change: FieldChange) -> bool {
        let changed = match self.get_mut(id) {
            Some(entry) => entry.session.apply(change),
            None => return false,
        };
        if changed {
            self.bump();
        }
        changed
    }

    pub fn is_dirty(&self, id: SessionId, field: Field) -> bool {
        self.get(id).is_some_and(|e| e.dirty.get(field))
    }

    /// Sets or clears the dirty flag of `(id, field)`.  Unknown ids are ignored.
    pub fn set_dirty(&mut self, id: SessionId, field: Field, dirty: bool) {
        if let Some(entry) = self.get_mut(id) {
            entry.dirty.set(field, dirty);
        }
    }

    /// Discards the generation marker so the next `FullSnapshot` is awaited.
    ///
    /// Entries stay visible until the snapshot arrives.
    pub fn invalidate(&mut self) {
        self.synced = false;
    }

    /// Empties the cache (used on transport loss).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.synced = false;
        self.bump();
    }
}

impl Default for ShadowCache {
    fn default() -> Self {
        Self::new()
    }
}

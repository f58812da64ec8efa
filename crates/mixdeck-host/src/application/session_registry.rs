//! SessionRegistry: the host's authoritative list of audio sessions.
//!
//! Every audio-producing process the host observes gets one entry.  The
//! registry keeps them in **first-observed order** so that the device's
//! session list does not jump around when volumes change.
//!
//! Two kinds of writers mutate the registry:
//!
//! - The audio backend, reporting changes made outside MixDeck (another app,
//!   the OS mixer).  These go through [`SessionRegistry::apply_external_change`].
//! - The device, via an `Intent` message.  These go through
//!   [`SessionRegistry::apply_intent`], which additionally requires that the
//!   session still exists.
//!
//! Once accepted, both paths are identical: the value is clamped, stored, and
//! queued as a [`RegistryChange`] for the relay to push to the device.
//!
//! # Sharing between tasks (for beginners)
//!
//! The audio watcher and the serial link run as separate Tokio tasks.  They
//! share one [`SharedRegistry`], which wraps the registry in a
//! `std::sync::Mutex`.  Every method takes the lock for exactly one operation
//! and releases it before returning, so no task ever holds it across an
//! `.await` or an audio/serial call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mixdeck_core::{Field, FieldChange, Session, SessionId};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The session is not (or no longer) in the registry.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

/// A registry mutation that has not yet been pushed to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    Added(Session),
    Updated { id: SessionId, change: FieldChange },
    Removed(SessionId),
}

impl RegistryChange {
    fn session_id(&self) -> SessionId {
        match self {
            RegistryChange::Added(s) => s.id,
            RegistryChange::Updated { id, .. } | RegistryChange::Removed(id) => *id,
        }
    }
}

/// Builds the clamped change for a raw `(field, value)` pair.
fn to_change(field: Field, value: i32) -> FieldChange {
    match field {
        Field::Volume => FieldChange::volume(value),
        Field::Muted => FieldChange::Muted(value != 0),
    }
}

/// In-memory registry of all live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    order: Vec<SessionId>,
    sessions: HashMap<SessionId, Session>,
    changes: Vec<RegistryChange>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the session with `id`, if it is live.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Returns every live session in first-observed order.
    pub fn list(&self) -> Vec<Session> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .cloned()
            .collect()
    }

    /// Registers a newly observed session, or refreshes an existing one.
    ///
    /// Returns `true` if the session was new.  A refreshed session keeps its
    /// position in the list.
    pub fn observe(&mut self, session: Session) -> bool {
        match self.sessions.get_mut(&session.id) {
            Some(existing) => {
                existing.name = session.name;
                let moved: Vec<FieldChange> =
                    [FieldChange::Volume(session.volume), FieldChange::Muted(session.muted)]
                        .into_iter()
                        .filter(|change| existing.apply(*change))
                        .collect();
                for change in moved {
                    self.queue(RegistryChange::Updated { id: session.id, change });
                }
                false
            }
            None => {
                debug!("registry: observed {} ({:?})", session.id, session.name);
                self.order.push(session.id);
                self.sessions.insert(session.id, session.clone());
                self.queue(RegistryChange::Added(session));
                true
            }
        }
    }

    /// Removes a session whose process exited.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&id)?;
        self.order.retain(|o| *o != id);
        debug!("registry: removed {id}");
        self.queue(RegistryChange::Removed(id));
        Some(removed)
    }

    /// Applies a change reported by the OS audio layer.
    ///
    /// The value is clamped into the field's domain.  Returns the change as
    /// stored; it is queued for the device only if the value actually moved.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownSession`] if `id` is not live.
    pub fn apply_external_change(
        &mut self,
        id: SessionId,
        field: Field,
        value: i32,
    ) -> Result<FieldChange, RegistryError> {
        let change = to_change(field, value);
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        if session.apply(change) {
            self.queue(RegistryChange::Updated { id, change });
        }
        Ok(change)
    }

    /// Applies a device-originated intent.
    ///
    /// Validation and clamping are the same as for external changes; the
    /// registry does not record where an accepted change came from.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownSession`] if the session exited before
    /// the intent arrived.
    pub fn apply_intent(
        &mut self,
        id: SessionId,
        field: Field,
        value: i32,
    ) -> Result<FieldChange, RegistryError> {
        let result = self.apply_external_change(id, field, value);
        if let Err(ref e) = result {
            debug!("registry: intent rejected: {e}");
        }
        result
    }

    /// Reconciles the registry against a full enumeration from the backend.
    ///
    /// New sessions are appended, missing ones removed, and changed values
    /// applied as external changes.  Returns the number of changes queued.
    pub fn sync_from_backend(&mut self, enumerated: Vec<Session>) -> usize {
        let before = self.changes.len();
        let live: Vec<SessionId> = enumerated.iter().map(|s| s.id).collect();
        let gone: Vec<SessionId> = self
            .order
            .iter()
            .copied()
            .filter(|id| !live.contains(id))
            .collect();
        for id in gone {
            self.remove(id);
        }
        for session in enumerated {
            self.observe(session);
        }
        self.changes.len().saturating_sub(before)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Takes every queued change in the order it happened.
    pub fn take_changes(&mut self) -> Vec<RegistryChange> {
        std::mem::take(&mut self.changes)
    }

    /// Returns the full list for a `FullSnapshot` and drops queued changes,
    /// which the snapshot already contains.
    pub fn snapshot(&mut self) -> Vec<Session> {
        self.changes.clear();
        self.list()
    }

    fn queue(&mut self, change: RegistryChange) {
        match change {
            RegistryChange::Updated { id, change: new } => {
                // Coalesce repeated updates of the same field.
                let slot = self.changes.iter().position(|c| {
                    matches!(c, RegistryChange::Updated { id: cid, change }
                        if *cid == id && change.field() == new.field())
                });
                let update = RegistryChange::Updated { id, change: new };
                match slot {
                    Some(i) => self.changes[i] = update,
                    None => self.changes.push(update),
                }
            }
            RegistryChange::Removed(id) => {
                let was_unpublished = self
                    .changes
                    .iter()
                    .any(|c| matches!(c, RegistryChange::Added(s) if s.id == id));
                self.changes.retain(|c| c.session_id() != id);
                if !was_unpublished {
                    self.changes.push(RegistryChange::Removed(id));
                }
            }
            added @ RegistryChange::Added(_) => self.changes.push(added),
        }
    }
}

/// A [`SessionRegistry`] shared between the audio and link tasks.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<SessionRegistry>>,
    changed: Arc<Notify>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionRegistry> {
        // A panic while holding the lock cannot leave a half-applied field
        // write, so the data is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the lock held and wakes the link task if it queued
    /// anything.
    fn mutate<T>(&self, f: impl FnOnce(&mut SessionRegistry) -> T) -> T {
        let (result, pending) = {
            let mut registry = self.lock();
            let result = f(&mut registry);
            (result, registry.has_pending_changes())
        };
        if pending {
            self.changed.notify_one();
        }
        result
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.lock().list()
    }

    pub fn observe(&self, session: Session) -> bool {
        self.mutate(|r| r.observe(session))
    }

    pub fn remove(&self, id: SessionId) -> Option<Session> {
        self.mutate(|r| r.remove(id))
    }

    pub fn apply_external_change(
        &self,
        id: SessionId,
        field: Field,
        value: i32,
    ) -> Result<FieldChange, RegistryError> {
        self.mutate(|r| r.apply_external_change(id, field, value))
    }

    pub fn apply_intent(
        &self,
        id: SessionId,
        field: Field,
        value: i32,
    ) -> Result<FieldChange, RegistryError> {
        self.mutate(|r| r.apply_intent(id, field, value))
    }

    pub fn sync_from_backend(&self, enumerated: Vec<Session>) -> usize {
        self.mutate(|r| r.sync_from_backend(enumerated))
    }

    pub fn take_changes(&self) -> Vec<RegistryChange> {
        self.lock().take_changes()
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.lock().snapshot()
    }

    /// Waits until a mutation has queued a change for the device.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn music() -> Session {
        Session::new(SessionId(1), "Music", 40, false)
    }

    fn call() -> Session {
        Session::new(SessionId(2), "Call", 80, false)
    }

    fn registry_with_two() -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        registry.observe(music());
        registry.observe(call());
        registry.take_changes();
        registry
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_list_preserves_first_observed_order() {
        // Arrange
        let mut registry = SessionRegistry::new();
        registry.observe(Session::new(SessionId(9), "Zeta", 10, false));
        registry.observe(Session::new(SessionId(3), "Alpha", 20, false));

        // Act – refreshing the first one must not move it
        registry.observe(Session::new(SessionId(9), "Zeta", 70, false));

        // Assert
        let ids: Vec<_> = registry.list().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId(9), SessionId(3)]);
        assert_eq!(registry.list(), registry.list(), "stable across calls");
    }

    #[test]
    fn test_observe_new_session_queues_added() {
        let mut registry = SessionRegistry::new();
        assert!(registry.observe(music()));
        assert_eq!(registry.take_changes(), vec![RegistryChange::Added(music())]);
    }

    #[test]
    fn test_observe_existing_session_queues_only_changed_fields() {
        let mut registry = registry_with_two();
        assert!(!registry.observe(Session::new(SessionId(1), "Music", 40, true)));
        assert_eq!(
            registry.take_changes(),
            vec![RegistryChange::Updated {
                id: SessionId(1),
                change: FieldChange::Muted(true)
            }]
        );
    }

    #[test]
    fn test_apply_external_change_clamps_and_queues() {
        // Arrange
        let mut registry = registry_with_two();

        // Act
        let applied = registry
            .apply_external_change(SessionId(2), Field::Volume, 180)
            .unwrap();

        // Assert
        assert_eq!(applied, FieldChange::Volume(100));
        assert_eq!(registry.get(SessionId(2)).unwrap().volume, 100);
        assert_eq!(
            registry.take_changes(),
            vec![RegistryChange::Updated {
                id: SessionId(2),
                change: FieldChange::Volume(100)
            }]
        );
    }

    #[test]
    fn test_unchanged_value_is_not_queued() {
        let mut registry = registry_with_two();
        registry
            .apply_external_change(SessionId(1), Field::Volume, 40)
            .unwrap();
        assert!(!registry.has_pending_changes());
    }

    #[test]
    fn test_apply_intent_updates_volume() {
        let mut registry = registry_with_two();
        let applied = registry.apply_intent(SessionId(1), Field::Volume, 55).unwrap();
        assert_eq!(applied, FieldChange::Volume(55));
        assert_eq!(registry.get(SessionId(1)).unwrap().volume, 55);
    }

    #[test]
    fn test_apply_intent_for_exited_session_is_unknown() {
        let mut registry = registry_with_two();
        registry.remove(SessionId(2));
        assert_eq!(
            registry.apply_intent(SessionId(2), Field::Volume, 10),
            Err(RegistryError::UnknownSession(SessionId(2)))
        );
    }

    #[test]
    fn test_mute_intent_treats_non_zero_as_muted() {
        let mut registry = registry_with_two();
        registry.apply_intent(SessionId(1), Field::Muted, 7).unwrap();
        assert!(registry.get(SessionId(1)).unwrap().muted);
    }

    #[test]
    fn test_repeated_updates_of_one_field_are_coalesced() {
        let mut registry = registry_with_two();
        for v in [41, 42, 43] {
            registry.apply_external_change(SessionId(1), Field::Volume, v).unwrap();
        }
        registry.apply_external_change(SessionId(1), Field::Muted, 1).unwrap();

        assert_eq!(
            registry.take_changes(),
            vec![
                RegistryChange::Updated {
                    id: SessionId(1),
                    change: FieldChange::Volume(43)
                },
                RegistryChange::Updated {
                    id: SessionId(1),
                    change: FieldChange::Muted(true)
                },
            ]
        );
    }

    #[test]
    fn test_remove_drops_pending_updates_for_that_session() {
        let mut registry = registry_with_two();
        registry.apply_external_change(SessionId(2), Field::Volume, 10).unwrap();
        registry.remove(SessionId(2));
        assert_eq!(registry.take_changes(), vec![RegistryChange::Removed(SessionId(2))]);
    }

    #[test]
    fn test_session_added_and_removed_before_push_leaves_no_trace() {
        let mut registry = registry_with_two();
        registry.observe(Session::new(SessionId(5), "Beep", 10, false));
        registry.remove(SessionId(5));
        assert!(registry.take_changes().is_empty());
    }

    #[test]
    fn test_sync_from_backend_adds_removes_and_updates() {
        // Arrange
        let mut registry = registry_with_two();
        let enumerated = vec![
            Session::new(SessionId(1), "Music", 60, false),
            Session::new(SessionId(3), "Game", 30, false),
        ];

        // Act
        let queued = registry.sync_from_backend(enumerated);

        // Assert
        assert_eq!(queued, 3);
        let ids: Vec<_> = registry.list().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId(1), SessionId(3)]);
        assert_eq!(registry.get(SessionId(1)).unwrap().volume, 60);
    }

    #[test]
    fn test_snapshot_clears_queued_changes() {
        let mut registry = registry_with_two();
        registry.apply_external_change(SessionId(1), Field::Volume, 1).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!registry.has_pending_changes());
    }

    #[tokio::test]
    async fn test_shared_registry_notifies_on_change() {
        // Arrange
        let shared = SharedRegistry::new();
        shared.observe(music());
        shared.take_changes();

        // Act
        shared
            .apply_external_change(SessionId(1), Field::Volume, 12)
            .unwrap();

        // Assert – the permit is stored, so this returns immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), shared.changed())
            .await
            .expect("notified");
        assert_eq!(shared.get(SessionId(1)).unwrap().volume, 12);
    }

    #[test]
    fn test_shared_registry_clones_see_same_state() {
        let a = SharedRegistry::new();
        let b = a.clone();
        a.observe(call());
        assert_eq!(b.len(), 1);
    }
}

//! The audio `Session` entity and the value rules every component shares.
//!
//! A session is one audio-producing process on the host (a music player, a
//! voice-call client, a browser tab group).  The host owns the authoritative
//! copy; the device only ever sees snapshots of it.
//!
//! Two rules are enforced here so that the host registry, the wire codec, and
//! the device cache cannot disagree about them:
//!
//! - **Clamp law**: a volume is always within `0..=100`.  Any requested value
//!   is clamped as `max(0, min(100, requested))`.
//! - **Name budget**: the display name is truncated to [`NAME_CHAR_BUDGET`]
//!   characters (not bytes), because the device renders a fixed-width font.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest representable volume.
pub const VOLUME_MAX: u8 = 100;

/// Number of characters of a session name the device can display.
pub const NAME_CHAR_BUDGET: usize = 16;

/// Host-assigned identifier of a session.
///
/// Unique among concurrently live sessions and stable for the lifetime of the
/// underlying process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Clamps a requested volume into `0..=100`.
///
/// # Examples
///
/// ```rust
/// use mixdeck_core::clamp_volume;
///
/// assert_eq!(clamp_volume(-5), 0);
/// assert_eq!(clamp_volume(55), 55);
/// assert_eq!(clamp_volume(250), 100);
/// ```
pub fn clamp_volume(requested: i32) -> u8 {
    requested.clamp(0, i32::from(VOLUME_MAX)) as u8
}

/// Truncates a display name to the on-device character budget.
pub fn truncate_name(name: &str) -> String {
    name.chars().take(NAME_CHAR_BUDGET).collect()
}

/// Identifies one mutable field of a session on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Field {
    Volume = 0x01,
    Muted = 0x02,
}

impl TryFrom<u8> for Field {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Field::Volume),
            0x02 => Ok(Field::Muted),
            _ => Err(()),
        }
    }
}

/// A typed change to one session field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldChange {
    Volume(u8),
    Muted(bool),
}

impl FieldChange {
    /// Builds a volume change, applying the clamp law.
    pub fn volume(requested: i32) -> Self {
        FieldChange::Volume(clamp_volume(requested))
    }

    /// Returns which field this change targets.
    pub fn field(&self) -> Field {
        match self {
            FieldChange::Volume(_) => Field::Volume,
            FieldChange::Muted(_) => Field::Muted,
        }
    }

    /// Converts to the `(field, value)` pair carried by `Delta` and `Intent`.
    pub fn to_wire(self) -> (Field, i16) {
        match self {
            FieldChange::Volume(v) => (Field::Volume, i16::from(v)),
            FieldChange::Muted(m) => (Field::Muted, i16::from(m)),
        }
    }

    /// Interprets a wire `(field, value)` pair.
    ///
    /// Volume values outside `0..=100` are clamped; any non-zero mute value
    /// means "muted".
    pub fn from_wire(field: Field, value: i16) -> Self {
        match field {
            Field::Volume => FieldChange::volume(i32::from(value)),
            Field::Muted => FieldChange::Muted(value != 0),
        }
    }
}

/// One host-tracked audio session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Display label, already truncated to [`NAME_CHAR_BUDGET`].
    pub name: String,
    /// Volume in `0..=100`.
    pub volume: u8,
    pub muted: bool,
}

impl Session {
    /// Creates a session, clamping the volume and truncating the name.
    pub fn new(id: SessionId, name: &str, volume: i32, muted: bool) -> Self {
        Self {
            id,
            name: truncate_name(name),
            volume: clamp_volume(volume),
            muted,
        }
    }

    /// Applies a change and reports whether the stored value changed.
    pub fn apply(&mut self, change: FieldChange) -> bool {
        match change {
            FieldChange::Volume(v) => {
                let v = v.min(VOLUME_MAX);
                let changed = self.volume != v;
                self.volume = v;
                changed
            }
            FieldChange::Muted(m) => {
                let changed = self.muted != m;
                self.muted = m;
                changed
            }
        }
    }

    /// Returns the current value of `field` as a change that would set it.
    pub fn value_of(&self, field: Field) -> FieldChange {
        match field {
            Field::Volume => FieldChange::Volume(self.volume),
            Field::Muted => FieldChange::Muted(self.muted),
        }
    }
}

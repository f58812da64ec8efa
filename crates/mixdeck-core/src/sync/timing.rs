//! Scheduler tick type and the link's fixed timing bounds.
//!
//! The engine never reads a clock.  Callers pass the current tick count into
//! every call, which keeps the state machine deterministic under test and
//! lets the device drive it from its cooperative loop.

use serde::{Deserialize, Serialize};

/// Monotonic scheduler tick (10 ms on both host and device by default).
pub type Tick = u64;

/// Default scheduler tick period in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 10;

/// Timing and window bounds of one link.
///
/// Serializable so the host can expose it as the `[sync]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTimings {
    /// Ticks to wait for an `Ack` before retransmitting.
    pub ack_timeout_ticks: Tick,
    /// Retransmissions before giving up and resynchronising.
    pub max_retries: u32,
    /// Outbound idleness after which a `Heartbeat` is sent.
    pub heartbeat_interval_ticks: Tick,
    /// Inbound silence after which the peer is considered gone.
    pub silence_timeout_ticks: Tick,
    /// Host only: interval between unsolicited `FullSnapshot`s.
    pub resync_interval_ticks: Tick,
    /// Maximum number of out-of-order messages held for reordering.
    pub reorder_window: usize,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            ack_timeout_ticks: 25,
            max_retries: 3,
            heartbeat_interval_ticks: 500,
            silence_timeout_ticks: 1500,
            resync_interval_ticks: 3000,
            reorder_window: 16,
        }
    }
}

/// Converts a millisecond duration into ticks, rounding up.
pub fn ms_to_ticks(ms: u64, tick_ms: u64) -> Tick {
    let tick_ms = tick_ms.max(1);
    ms.div_ceil(tick_ms)
}

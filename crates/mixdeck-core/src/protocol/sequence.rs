//! Per-direction message id counter and wrap-aware id comparison.
//!
//! # Why 16 bits? (for beginners)
//!
//! Every byte counts on a 115200-baud serial link, so `msg_id` is a `u16`.
//! It wraps from 65535 back to 0 after a few hours of heavy use.  Plain `<`
//! comparisons would break at the wrap, so ids are compared with
//! *serial-number arithmetic*: `a` is newer than `b` when the wrapping
//! distance from `b` to `a` is less than half the id space.

use std::sync::atomic::{AtomicU16, Ordering};

/// A monotonically increasing (wrapping) counter for outbound `msg_id`s.
///
/// The first call to [`next`](Self::next) returns 1; [`current`](Self::current)
/// returns the last assigned id, which control messages reuse.
///
/// # Examples
///
/// ```rust
/// use mixdeck_core::protocol::sequence::MsgIdCounter;
///
/// let ids = MsgIdCounter::new();
/// assert_eq!(ids.current(), 0);
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// assert_eq!(ids.current(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MsgIdCounter {
    inner: AtomicU16,
}

impl MsgIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns and returns a fresh id.  Wraps from `u16::MAX` to 0.
    pub fn next(&self) -> u16 {
        // `fetch_add` returns the previous value and wraps on overflow.
        self.inner.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Returns the last assigned id without incrementing.
    pub fn current(&self) -> u16 {
        self.inner.load(Ordering::Relaxed)
    }
}

/// Returns `true` when `a` comes after `b` in wrapping id order.
pub fn seq_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// Forward distance from `from` to `to` in wrapping id order.
pub fn seq_distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

//! Link synchronisation: the state machine and its timing bounds.

pub mod engine;
pub mod timing;

pub use engine::{LinkEngine, LinkEvent, LinkRole, LinkState};
pub use timing::{SyncTimings, Tick};

//! Domain entities for MixDeck.
//!
//! This module contains pure data and rules with no infrastructure
//! dependencies: it can be compiled and tested on any platform.
//!
//! - [`session`] – the `Session` entity, the volume clamp law, and the
//!   display-name budget shared by host and device.
//! - [`shadow`] – the device's `ShadowCache`, a lagging replica of the host's
//!   registry.

pub mod session;
pub mod shadow;

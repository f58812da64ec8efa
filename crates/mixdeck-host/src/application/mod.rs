//! Application layer use cases for the host application.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules, here in `mixdeck_core`) and the infrastructure
//! (audio APIs, serial ports, files).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "when the
//!   knob on the device turns, change the music player's volume").
//! - **Depend on abstractions** (the [`AudioBackend`] trait) rather than
//!   concrete implementations, so the OS audio API can be swapped without
//!   changing this code.
//! - **Contain no socket or file I/O**.
//!
//! # Sub-modules
//!
//! - **`session_registry`** – The host's single source of truth: every live
//!   audio session in first-observed order, plus the queue of changes that
//!   still have to be pushed to the device.
//!
//! - **`relay`** – Drives one serial link: decodes inbound frames, applies
//!   device intents to the registry and the audio backend, and pushes
//!   snapshots and deltas back out.
//!
//! [`AudioBackend`]: crate::infrastructure::audio::AudioBackend

pub mod relay;
pub mod session_registry;

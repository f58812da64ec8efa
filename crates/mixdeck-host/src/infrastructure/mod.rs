//! Infrastructure layer for the host application.
//!
//! Contains OS-facing adapters: the audio-session backend, the serial link
//! task, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `mixdeck_core`, but the `application` layer only reaches into it for the
//! [`audio::AudioBackend`] port.

pub mod audio;
pub mod serial;
pub mod storage;

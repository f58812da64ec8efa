//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory, writes it back when asked, and provides
//! defaults on first run when no file exists yet.

pub mod config;

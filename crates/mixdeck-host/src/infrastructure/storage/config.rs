//! TOML-based configuration persistence for the host application.
//!
//! Reads and writes `HostConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\MixDeck\config.toml`
//! - Linux:    `~/.config/mixdeck/config.toml`
//! - macOS:    `~/Library/Application Support/MixDeck/config.toml`
//!
//! # Example file
//!
//! ```toml
//! [host]
//! log_level = "info"
//!
//! [link]
//! device = "/dev/ttyACM0"
//! reconnect_interval_ms = 1000
//! tick_ms = 10
//!
//! [sync]
//! ack_timeout_ticks = 25
//! max_retries = 3
//!
//! [audio]
//! poll_interval_ms = 1000
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  Every section
//! is optional, so an empty file (or no file at all) yields the defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mixdeck_core::sync::timing::DEFAULT_TICK_MS;
use mixdeck_core::SyncTimings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `link.listen` is not a socket address.
    #[error("invalid listen address {0:?}")]
    InvalidListenAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: GeneralConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub sync: SyncTimings,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// General host behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the device is and how to keep talking to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    /// Serial device path.  When absent the host listens on `listen` for the
    /// device simulator instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
    /// TCP address the simulator connects to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Pause between reconnection attempts after the link is lost.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Scheduler tick period; the `[sync]` bounds are counted in these.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Audio backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    /// How often sessions are re-enumerated.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// The link the host should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    SerialDevice(PathBuf),
    TcpListen(SocketAddr),
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen() -> String {
    "127.0.0.1:7420".to_string()
}
fn default_reconnect_interval_ms() -> u64 {
    1000
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: None,
            listen: default_listen(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LinkConfig {
    /// Resolves which transport to open.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidListenAddress`] if no serial device is
    /// set and `listen` does not parse.
    pub fn target(&self) -> Result<LinkTarget, ConfigError> {
        if let Some(device) = &self.device {
            return Ok(LinkTarget::SerialDevice(device.clone()));
        }
        self.listen
            .parse()
            .map(LinkTarget::TcpListen)
            .map_err(|_| ConfigError::InvalidListenAddress(self.listen.clone()))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl AudioConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `HostConfig` from the platform config file, returning the defaults
/// if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<HostConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `HostConfig` from an explicit path (the `--config` flag).
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from(path: &Path) -> Result<HostConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform config file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to an explicit path, creating parent directories.
///
/// # Errors
///
/// Same as [`save_config`].
pub fn save_config_to(config: &HostConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the `MixDeck`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MixDeck"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("mixdeck"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MixDeck")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mixdeck_test_{tag}_{}", std::process::id()))
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_host_config_default_link_settings() {
        // Arrange / Act
        let cfg = HostConfig::default();

        // Assert
        assert_eq!(cfg.link.device, None);
        assert_eq!(cfg.link.listen, "127.0.0.1:7420");
        assert_eq!(cfg.link.reconnect_interval_ms, 1000);
        assert_eq!(cfg.link.tick_ms, 10);
    }

    #[test]
    fn test_host_config_default_sync_matches_engine_defaults() {
        assert_eq!(HostConfig::default().sync, SyncTimings::default());
    }

    #[test]
    fn test_general_config_default_log_level_is_info() {
        assert_eq!(GeneralConfig::default().log_level, "info");
    }

    // ── TOML round-trip ───────────────────────────────────────────────────────

    #[test]
    fn test_host_config_serializes_and_deserializes_round_trip() {
        // Arrange
        let mut cfg = HostConfig::default();
        cfg.link.device = Some(PathBuf::from("/dev/ttyACM0"));
        cfg.sync.max_retries = 5;
        cfg.audio.poll_interval_ms = 250;

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: HostConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_absent_device_is_omitted_from_toml() {
        let toml_str = toml::to_string_pretty(&HostConfig::default()).expect("serialize");
        assert!(!toml_str.contains("device"), "None device must be omitted");
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: HostConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_deserialize_partial_sync_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[sync]
ack_timeout_ticks = 40
"#;

        // Act
        let cfg: HostConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.sync.ack_timeout_ticks, 40);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.sync.max_retries, 3);
        assert_eq!(cfg.link.tick_ms, 10);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<HostConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Link target ───────────────────────────────────────────────────────────

    #[test]
    fn test_link_target_prefers_serial_device() {
        let link = LinkConfig {
            device: Some(PathBuf::from("COM4")),
            ..LinkConfig::default()
        };
        assert_eq!(
            link.target().unwrap(),
            LinkTarget::SerialDevice(PathBuf::from("COM4"))
        );
    }

    #[test]
    fn test_link_target_falls_back_to_tcp_listen() {
        let target = LinkConfig::default().target().unwrap();
        assert_eq!(target, LinkTarget::TcpListen("127.0.0.1:7420".parse().unwrap()));
    }

    #[test]
    fn test_link_target_rejects_bad_listen_address() {
        let link = LinkConfig {
            listen: "not-an-address".to_string(),
            ..LinkConfig::default()
        };
        assert!(matches!(
            link.target(),
            Err(ConfigError::InvalidListenAddress(_))
        ));
    }

    // ── File persistence ──────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config_from(&path).unwrap(), HostConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = temp_dir("roundtrip");
        let path = dir.join("nested").join("config.toml");
        let mut cfg = HostConfig::default();
        cfg.host.log_level = "debug".to_string();
        cfg.link.listen = "0.0.0.0:9000".to_string();

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_is_parse_error() {
        let dir = temp_dir("malformed");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[link\nlisten = ").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir (e.g. in a stripped CI env) is also acceptable.
    }
}

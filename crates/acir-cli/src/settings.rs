//! Host settings – reads/writes `~/.acir/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use acir_store::{ConfigDefaults, MatchPolicy};
use acir_types::{MacAddress, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write settings at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid MAC address: {0}")]
    Mac(#[from] StoreError),
}

/// Signal comparison used for scene recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Exact,
    Tolerant,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::Exact => write!(f, "exact"),
            PolicyKind::Tolerant => write!(f, "tolerant"),
        }
    }
}

/// Factory values installed whenever the device config is reset.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerDefaults {
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Sensor report interval in milliseconds.
    #[serde(default = "default_window_ms")]
    pub sensor_interval_ms: u32,

    /// Ghost-detection window in milliseconds.
    #[serde(default = "default_window_ms")]
    pub ghost_window_ms: u32,
}

impl std::fmt::Debug for BrokerDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerDefaults")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("sensor_interval_ms", &self.sensor_interval_ms)
            .field("ghost_window_ms", &self.ghost_window_ms)
            .finish()
    }
}

impl Default for BrokerDefaults {
    fn default() -> Self {
        let d = ConfigDefaults::default();
        Self {
            server: d.mqtt_server,
            port: d.mqtt_port,
            user: d.mqtt_user,
            password: d.mqtt_password,
            sensor_interval_ms: d.sensor_interval_ms,
            ghost_window_ms: d.ghost_window_ms,
        }
    }
}

fn default_server() -> String {
    ConfigDefaults::default().mqtt_server
}
fn default_port() -> u16 {
    ConfigDefaults::default().mqtt_port
}
fn default_user() -> String {
    ConfigDefaults::default().mqtt_user
}
fn default_window_ms() -> u32 {
    30_000
}

/// Persisted host settings stored in `~/.acir/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Image file standing in for the device's non-volatile region.
    #[serde(default = "default_image_path")]
    pub image_path: PathBuf,

    /// Hardware address the default device UUID is derived from.
    #[serde(default = "default_mac")]
    pub mac: String,

    #[serde(default)]
    pub match_policy: PolicyKind,

    /// Per-duration tolerance used by the `tolerant` policy.
    #[serde(default = "default_tolerance")]
    pub tolerance_percent: u8,

    #[serde(default)]
    pub broker: BrokerDefaults,
}

fn default_image_path() -> PathBuf {
    acir_dir_for_home(&home_dir()).join("flash.bin")
}
fn default_mac() -> String {
    "02:00:00:00:00:01".to_string()
}
fn default_tolerance() -> u8 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_path: default_image_path(),
            mac: default_mac(),
            match_policy: PolicyKind::default(),
            tolerance_percent: default_tolerance(),
            broker: BrokerDefaults::default(),
        }
    }
}

impl Settings {
    pub fn mac_address(&self) -> Result<MacAddress, SettingsError> {
        Ok(self.mac.parse()?)
    }

    pub fn policy(&self) -> MatchPolicy {
        match self.match_policy {
            PolicyKind::Exact => MatchPolicy::Exact,
            PolicyKind::Tolerant => MatchPolicy::Tolerant {
                percent: self.tolerance_percent,
            },
        }
    }

    pub fn config_defaults(&self) -> ConfigDefaults {
        ConfigDefaults {
            mqtt_server: self.broker.server.clone(),
            mqtt_port: self.broker.port,
            mqtt_user: self.broker.user.clone(),
            mqtt_password: self.broker.password.clone(),
            sensor_interval_ms: self.broker.sensor_interval_ms,
            ghost_window_ms: self.broker.ghost_window_ms,
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn acir_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".acir")
}

/// Return the path to `~/.acir/config.toml`.
pub fn settings_path() -> PathBuf {
    settings_path_for_home(&home_dir())
}

pub(crate) fn settings_path_for_home(home: &str) -> PathBuf {
    acir_dir_for_home(home).join("config.toml")
}

/// Load settings from disk and apply environment overrides.  Returns `None`
/// if the file does not exist.
pub fn load() -> Result<Option<Settings>, SettingsError> {
    let mut settings = load_from(&settings_path())?;
    if let Some(s) = settings.as_mut() {
        apply_env_overrides(s);
    }
    Ok(settings)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Settings>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(toml::from_str(&raw)?))
}

/// Apply `ACIR_*` environment variable overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `ACIR_IMAGE` | `image_path` |
/// | `ACIR_MAC` | `mac` |
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("ACIR_IMAGE") {
        settings.image_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ACIR_MAC") {
        settings.mac = v;
    }
}

/// Save settings, creating `~/.acir/` if necessary.
pub fn save(settings: &Settings) -> Result<(), SettingsError> {
    save_to(settings, &settings_path())
}

pub(crate) fn save_to(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    let write_err = |source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
        // The broker password lives here; owner-only on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
        }
    }
    let raw = toml::to_string_pretty(settings)?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

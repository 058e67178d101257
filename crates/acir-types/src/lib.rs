use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lowest settable air-conditioner temperature in °C.
pub const MIN_TEMPERATURE: u8 = 16;
/// Highest settable air-conditioner temperature in °C.
pub const MAX_TEMPERATURE: u8 = 30;

/// Air-conditioner operating mode as stored alongside a learned scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AcMode {
    Cool,
    Heat,
    Dry,
    Fan,
    Auto,
}

impl AcMode {
    /// Wire spelling used both in JSON and in the persisted scene slot.
    pub fn as_str(self) -> &'static str {
        match self {
            AcMode::Cool => "cool",
            AcMode::Heat => "heat",
            AcMode::Dry => "dry",
            AcMode::Fan => "fan",
            AcMode::Auto => "auto",
        }
    }
}

impl fmt::Display for AcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cool" => Ok(AcMode::Cool),
            "heat" => Ok(AcMode::Heat),
            "dry" => Ok(AcMode::Dry),
            "fan" => Ok(AcMode::Fan),
            "auto" => Ok(AcMode::Auto),
            other => Err(StoreError::InvalidScene(format!("unknown mode '{other}'"))),
        }
    }
}

/// The semantic setting a learned raw signal stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AcSetting {
    pub power: bool,
    pub mode: AcMode,
    pub temperature: u8,
}

impl AcSetting {
    pub fn new(power: bool, mode: AcMode, temperature: u8) -> Self {
        Self {
            power,
            mode,
            temperature,
        }
    }

    /// Reject temperatures outside `MIN_TEMPERATURE..=MAX_TEMPERATURE`.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(StoreError::InvalidScene(format!(
                "temperature {} outside {MIN_TEMPERATURE}-{MAX_TEMPERATURE}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Hardware network address of the device, used to derive its default
/// identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Upper-case hex digits with no separators, e.g. `"A4CF12B0C3D1"`.
    pub fn compact_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| StoreError::Parse(format!("MAC address '{s}' is too short")))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|e| StoreError::Parse(format!("MAC address '{s}': {e}")))?;
        }
        if parts.next().is_some() {
            return Err(StoreError::Parse(format!("MAC address '{s}' is too long")));
        }
        Ok(Self(octets))
    }
}

/// Immutable event emitted by the IR receive path once a raw capture is
/// complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReceived {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Comma-separated pulse/space durations in microseconds.
    pub raw: String,
    /// Protocol name reported by the IR codec, `None` when no decoder
    /// recognised the capture.
    pub protocol: Option<String>,
}

impl SignalReceived {
    pub fn new(raw: impl Into<String>, protocol: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            raw: raw.into(),
            protocol,
        }
    }

    pub fn is_unrecognised(&self) -> bool {
        self.protocol.is_none()
    }
}

/// Partial configuration update accepted on the JSON control surface.
///
/// Every key is optional; keys not listed here are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,
    #[serde(default, rename = "deviceUUID", skip_serializing_if = "Option::is_none")]
    pub device_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u32>,
    /// Sensor report interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_interval: Option<u32>,
    /// Ghost-detection window in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghost_window: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<u8>,
    /// Numeric device id, stored only in its redundant slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
}

/// Persisted region a fault was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    ConfigRecord,
    SceneTable,
    SceneEntry(u8),
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::ConfigRecord => f.write_str("config record"),
            Region::SceneTable => f.write_str("scene table"),
            Region::SceneEntry(i) => write!(f, "scene entry {i}"),
        }
    }
}

/// Error type shared by the medium adapters and both stores.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    #[error("Checksum mismatch in {region}: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        region: Region,
        stored: u16,
        computed: u16,
    },

    #[error("Validation failure in {region}: {reason}")]
    Validation { region: Region, reason: String },

    #[error("Scene table is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Malformed input: {0}")]
    Parse(String),

    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    #[error("Medium access out of bounds: offset {offset} + {len} exceeds {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("Record medium is busy (reentrant store access)")]
    Busy,

    #[error("Medium I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// `true` for the classes that are healed locally at load time.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::ChecksumMismatch { .. } | StoreError::Validation { .. }
        )
    }
}

//! Config Store.
//!
//! Persists the device's single [`ConfigRecord`] at a fixed offset, guarded
//! by an XOR checksum, plus two redundant scalar slots (user id and device
//! id) that live outside the checksummed record so an owner binding survives
//! record corruption.
//!
//! # Record layout (224 bytes, packed)
//!
//! | offset | field            | type     |
//! |--------|------------------|----------|
//! | 0      | mqtt server      | str[64]  |
//! | 64     | mqtt port        | u16      |
//! | 66     | mqtt user        | str[32]  |
//! | 98     | mqtt password    | str[64]  |
//! | 162    | device uuid      | str[32]  |
//! | 194    | user id          | u32      |
//! | 198    | sensor interval  | u32      |
//! | 202    | ghost window     | u32      |
//! | 206    | brand            | str[16]  |
//! | 222    | model            | u8       |
//! | 223    | checksum         | u8       |
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use acir_hal::SimMedium;
//! use acir_store::config_store::{ConfigDefaults, ConfigSource, ConfigStore};
//! use acir_types::MacAddress;
//!
//! let medium = Rc::new(RefCell::new(SimMedium::default()));
//! let mut store = ConfigStore::new(medium, MacAddress([0xA4, 0xCF, 0x12, 0, 0, 1]), ConfigDefaults::default());
//!
//! // A blank medium fails validation, so the store falls back to defaults.
//! assert_eq!(store.init().unwrap(), ConfigSource::Defaults);
//! assert_eq!(store.config().device_uuid, "ESP_A4CF12000001");
//!
//! assert!(store.update_from_json(r#"{"userId": 42}"#).unwrap());
//! assert_eq!(store.config().user_id, 42);
//! ```

use std::fmt;

use acir_hal::RecordMedium;
use acir_types::{ConfigUpdate, MacAddress, Region, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checksum::xor8;
use crate::layout::{
    CONFIG_BASE, DEVICE_ID_SLOT, FieldReader, FieldWriter, SLOT_ERASED, SharedMedium,
    USER_ID_SLOT, is_printable_ascii, medium_mut, medium_ref, truncate_str,
};

pub const MQTT_SERVER_CAP: usize = 64;
pub const MQTT_USER_CAP: usize = 32;
pub const MQTT_PASSWORD_CAP: usize = 64;
pub const DEVICE_UUID_CAP: usize = 32;
pub const BRAND_CAP: usize = 16;

/// Encoded size of the record including its trailing checksum byte.
pub const CONFIG_RECORD_LEN: usize = 224;

// ─────────────────────────────────────────────────────────────────────────────
// ConfigRecord
// ─────────────────────────────────────────────────────────────────────────────

/// The device's operating configuration.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub mqtt_server: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    #[serde(skip)]
    pub mqtt_password: String,
    #[serde(rename = "deviceUUID")]
    pub device_uuid: String,
    pub user_id: u32,
    #[serde(rename = "sensorInterval")]
    pub sensor_interval_ms: u32,
    #[serde(rename = "ghostWindow")]
    pub ghost_window_ms: u32,
    pub brand: String,
    pub model: u8,
}

impl fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("mqtt_server", &self.mqtt_server)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_user", &self.mqtt_user)
            .field(
                "mqtt_password",
                if self.mqtt_password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("device_uuid", &self.device_uuid)
            .field("user_id", &self.user_id)
            .field("sensor_interval_ms", &self.sensor_interval_ms)
            .field("ghost_window_ms", &self.ghost_window_ms)
            .field("brand", &self.brand)
            .field("model", &self.model)
            .finish()
    }
}

impl ConfigRecord {
    /// Factory configuration for a device with hardware address `mac`.
    pub fn defaults(defaults: &ConfigDefaults, mac: &MacAddress) -> Self {
        Self {
            mqtt_server: truncate_str(&defaults.mqtt_server, MQTT_SERVER_CAP - 1).to_string(),
            mqtt_port: defaults.mqtt_port,
            mqtt_user: truncate_str(&defaults.mqtt_user, MQTT_USER_CAP - 1).to_string(),
            mqtt_password: truncate_str(&defaults.mqtt_password, MQTT_PASSWORD_CAP - 1)
                .to_string(),
            device_uuid: format!("ESP_{}", mac.compact_hex()),
            user_id: 0,
            sensor_interval_ms: defaults.sensor_interval_ms,
            ghost_window_ms: defaults.ghost_window_ms,
            brand: String::new(),
            model: 0,
        }
    }

    /// Serialize into the fixed layout, checksum included.
    pub fn encode(&self) -> [u8; CONFIG_RECORD_LEN] {
        let mut buf = [0u8; CONFIG_RECORD_LEN];
        let mut w = FieldWriter::new(&mut buf);
        w.put_str(&self.mqtt_server, MQTT_SERVER_CAP);
        w.put_u16(self.mqtt_port);
        w.put_str(&self.mqtt_user, MQTT_USER_CAP);
        w.put_str(&self.mqtt_password, MQTT_PASSWORD_CAP);
        w.put_str(&self.device_uuid, DEVICE_UUID_CAP);
        w.put_u32(self.user_id);
        w.put_u32(self.sensor_interval_ms);
        w.put_u32(self.ghost_window_ms);
        w.put_str(&self.brand, BRAND_CAP);
        w.put_u8(self.model);
        debug_assert_eq!(w.position(), CONFIG_RECORD_LEN - 1);

        buf[CONFIG_RECORD_LEN - 1] = xor8(&buf[..CONFIG_RECORD_LEN - 1]);
        buf
    }

    /// Verify and deserialize a stored record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ChecksumMismatch`] when the stored checksum disagrees.
    /// - [`StoreError::Validation`] when the checksum holds but a string is
    ///   not printable ASCII or the port is zero.
    pub fn decode(bytes: &[u8; CONFIG_RECORD_LEN]) -> Result<Self, StoreError> {
        let stored = bytes[CONFIG_RECORD_LEN - 1];
        let computed = xor8(&bytes[..CONFIG_RECORD_LEN - 1]);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                region: Region::ConfigRecord,
                stored: u16::from(stored),
                computed: u16::from(computed),
            });
        }

        let mut r = FieldReader::new(bytes);
        let mqtt_server = checked_str(r.str_bytes(MQTT_SERVER_CAP), "mqttServer")?;
        let mqtt_port = r.u16();
        let mqtt_user = checked_str(r.str_bytes(MQTT_USER_CAP), "mqttUser")?;
        let mqtt_password = checked_str(r.str_bytes(MQTT_PASSWORD_CAP), "mqttPassword")?;
        let device_uuid = checked_str(r.str_bytes(DEVICE_UUID_CAP), "deviceUUID")?;
        let user_id = r.u32();
        let sensor_interval_ms = r.u32();
        let ghost_window_ms = r.u32();
        let brand = checked_str(r.str_bytes(BRAND_CAP), "brand")?;
        let model = r.u8();

        if mqtt_port == 0 {
            return Err(StoreError::Validation {
                region: Region::ConfigRecord,
                reason: "mqttPort is 0".to_string(),
            });
        }

        Ok(Self {
            mqtt_server,
            mqtt_port,
            mqtt_user,
            mqtt_password,
            device_uuid,
            user_id,
            sensor_interval_ms,
            ghost_window_ms,
            brand,
            model,
        })
    }
}

fn checked_str(bytes: &[u8], field: &str) -> Result<String, StoreError> {
    if !is_printable_ascii(bytes) {
        return Err(StoreError::Validation {
            region: Region::ConfigRecord,
            reason: format!("{field} contains non-printable bytes"),
        });
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Built-in values used whenever the record is reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDefaults {
    pub mqtt_server: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub sensor_interval_ms: u32,
    pub ghost_window_ms: u32,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            mqtt_server: "10.0.10.13".to_string(),
            mqtt_port: 1883,
            mqtt_user: "admin".to_string(),
            mqtt_password: String::new(),
            sensor_interval_ms: 30_000,
            ghost_window_ms: 30_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Successful result of [`ConfigStore::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stored record verified and validated.
    Loaded,
    /// The record was corrupt; defaults were installed and the user id was
    /// recovered from its redundant slot.  `persisted` is `false` when the
    /// repaired record could not be committed.
    Repaired { user_id: u32, persisted: bool },
}

/// Where the in-memory configuration came from after [`ConfigStore::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Stored,
    Repaired,
    Defaults,
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigStore
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the in-memory configuration and its persisted copy.
pub struct ConfigStore<M: RecordMedium> {
    medium: SharedMedium<M>,
    mac: MacAddress,
    defaults: ConfigDefaults,
    record: ConfigRecord,
    device_id: u32,
    loaded: bool,
}

impl<M: RecordMedium> ConfigStore<M> {
    /// Create a store holding factory defaults in memory.  Nothing is read or
    /// written until [`init`][Self::init] or [`load`][Self::load].
    pub fn new(medium: SharedMedium<M>, mac: MacAddress, defaults: ConfigDefaults) -> Self {
        let record = ConfigRecord::defaults(&defaults, &mac);
        Self {
            medium,
            mac,
            defaults,
            record,
            device_id: 0,
            loaded: false,
        }
    }

    /// Live view of the current configuration.
    pub fn config(&self) -> &ConfigRecord {
        &self.record
    }

    /// Device id as last read from or written to its redundant slot.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// `true` once a stored record has been accepted by [`load`][Self::load].
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Load the stored record, falling back to persisted defaults.
    ///
    /// # Errors
    ///
    /// Only a commit failure while persisting the defaults is returned; the
    /// in-memory defaults stay in effect either way.
    pub fn init(&mut self) -> Result<ConfigSource, StoreError> {
        match self.load() {
            Ok(LoadOutcome::Loaded) => Ok(ConfigSource::Stored),
            Ok(LoadOutcome::Repaired { .. }) => Ok(ConfigSource::Repaired),
            Err(e) => {
                warn!(error = %e, "no usable config record, installing defaults");
                self.reset_to_default()?;
                self.save()?;
                Ok(ConfigSource::Defaults)
            }
        }
    }

    /// Read and verify the stored record.
    ///
    /// On a checksum mismatch the store resets to defaults and persists them.
    /// When the redundant user-id slot holds a real binding (neither zero nor
    /// erased) that id is adopted and the load counts as repaired.
    ///
    /// # Errors
    ///
    /// [`StoreError::ChecksumMismatch`] when no binding could be recovered,
    /// [`StoreError::Validation`] when the record verifies but holds garbage.
    pub fn load(&mut self) -> Result<LoadOutcome, StoreError> {
        let (bytes, device_id) = {
            let medium = medium_ref(&self.medium)?;
            let mut bytes = [0u8; CONFIG_RECORD_LEN];
            medium.read(CONFIG_BASE, &mut bytes)?;
            (bytes, read_slot(&*medium, DEVICE_ID_SLOT)?)
        };

        match ConfigRecord::decode(&bytes) {
            Ok(record) => {
                self.record = record;
                self.device_id = device_id;
                self.loaded = true;
                info!(user_id = self.record.user_id, "config record loaded");
                Ok(LoadOutcome::Loaded)
            }
            Err(e @ StoreError::ChecksumMismatch { .. }) => {
                warn!(error = %e, "config record corrupt");
                let saved_user_id = read_slot(&*medium_ref(&self.medium)?, USER_ID_SLOT)?;
                debug!(saved_user_id, "redundant user-id slot");

                self.reset_to_default()?;
                if saved_user_id != 0 && saved_user_id != SLOT_ERASED {
                    self.record.user_id = saved_user_id;
                    let persisted = self.persist_after_reset();
                    info!(user_id = saved_user_id, persisted, "config repaired from redundant slot");
                    return Ok(LoadOutcome::Repaired {
                        user_id: saved_user_id,
                        persisted,
                    });
                }

                self.persist_after_reset();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "config record failed validation");
                Err(e)
            }
        }
    }

    fn persist_after_reset(&mut self) -> bool {
        match self.save() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "could not persist reset config record");
                false
            }
        }
    }

    /// Write the record and the redundant user-id slot, then commit.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let bytes = self.record.encode();
        let mut medium = medium_mut(&self.medium)?;
        medium.stage(CONFIG_BASE, &bytes)?;
        medium.stage(USER_ID_SLOT, &self.record.user_id.to_le_bytes())?;
        medium.commit()?;
        debug!(checksum = bytes[CONFIG_RECORD_LEN - 1], user_id = self.record.user_id, "config record saved");
        Ok(())
    }

    /// Install factory defaults in memory and stage zeroes into both
    /// redundant slots.  Nothing is committed.
    pub fn reset_to_default(&mut self) -> Result<(), StoreError> {
        info!("resetting config to defaults");
        self.record = ConfigRecord::defaults(&self.defaults, &self.mac);
        self.device_id = 0;

        let mut medium = medium_mut(&self.medium)?;
        medium.stage(USER_ID_SLOT, &0u32.to_le_bytes())?;
        medium.stage(DEVICE_ID_SLOT, &0u32.to_le_bytes())?;
        Ok(())
    }

    /// Apply a JSON partial update.
    ///
    /// Returns whether anything changed.  A change to the record triggers
    /// [`save`][Self::save]; `deviceId` goes straight to its redundant slot.
    ///
    /// # Errors
    ///
    /// [`StoreError::Parse`] for malformed JSON or out-of-range values, in
    /// which case nothing is modified.  Commit failures are passed through.
    pub fn update_from_json(&mut self, document: &str) -> Result<bool, StoreError> {
        let update: ConfigUpdate = serde_json::from_str(document).map_err(|e| {
            warn!(error = %e, "rejecting malformed config update");
            StoreError::Parse(e.to_string())
        })?;
        self.apply_update(update)
    }

    /// Apply an already-parsed partial update.  See
    /// [`update_from_json`][Self::update_from_json].
    pub fn apply_update(&mut self, update: ConfigUpdate) -> Result<bool, StoreError> {
        if update.mqtt_port == Some(0) {
            return Err(StoreError::Parse("mqttPort must be 1-65535".to_string()));
        }
        for (field, value) in [
            ("mqttServer", &update.mqtt_server),
            ("mqttUser", &update.mqtt_user),
            ("mqttPassword", &update.mqtt_password),
            ("deviceUUID", &update.device_uuid),
            ("brand", &update.brand),
        ] {
            // The record codec only round-trips printable ASCII.
            if let Some(v) = value
                && !is_printable_ascii(v.as_bytes())
            {
                warn!(field, "rejecting non-printable config value");
                return Err(StoreError::Parse(format!("{field} must be printable ASCII")));
            }
        }

        let mut changed = false;
        let record = &mut self.record;

        if let Some(v) = update.mqtt_server {
            record.mqtt_server = truncate_str(&v, MQTT_SERVER_CAP - 1).to_string();
            changed = true;
        }
        if let Some(v) = update.mqtt_port {
            record.mqtt_port = v;
            changed = true;
        }
        if let Some(v) = update.mqtt_user {
            record.mqtt_user = truncate_str(&v, MQTT_USER_CAP - 1).to_string();
            changed = true;
        }
        if let Some(v) = update.mqtt_password {
            record.mqtt_password = truncate_str(&v, MQTT_PASSWORD_CAP - 1).to_string();
            changed = true;
        }
        if let Some(v) = update.device_uuid {
            record.device_uuid = truncate_str(&v, DEVICE_UUID_CAP - 1).to_string();
            changed = true;
        }
        if let Some(v) = update.user_id {
            record.user_id = v;
            changed = true;
        }
        if let Some(v) = update.sensor_interval {
            record.sensor_interval_ms = v;
            changed = true;
        }
        if let Some(v) = update.ghost_window {
            record.ghost_window_ms = v;
            changed = true;
        }
        if let Some(v) = update.brand {
            record.brand = truncate_str(&v, BRAND_CAP - 1).to_string();
            debug!(brand = %record.brand, "brand updated");
            changed = true;
        }
        if let Some(v) = update.model {
            record.model = v;
            changed = true;
        }

        let mut device_id_written = false;
        if let Some(id) = update.device_id {
            self.save_device_id(id)?;
            device_id_written = true;
        }

        if changed {
            info!("config updated");
            self.save()?;
        }
        Ok(changed || device_id_written)
    }

    /// Bind the device to `user_id`: update the record in memory and commit
    /// only the redundant slot.
    pub fn save_user_id(&mut self, user_id: u32) -> Result<(), StoreError> {
        self.record.user_id = user_id;
        let mut medium = medium_mut(&self.medium)?;
        medium.stage(USER_ID_SLOT, &user_id.to_le_bytes())?;
        medium.commit()?;
        info!(user_id, "user id saved");
        Ok(())
    }

    /// Commit `device_id` to its redundant slot.
    pub fn save_device_id(&mut self, device_id: u32) -> Result<(), StoreError> {
        self.device_id = device_id;
        let mut medium = medium_mut(&self.medium)?;
        medium.stage(DEVICE_ID_SLOT, &device_id.to_le_bytes())?;
        medium.commit()?;
        info!(device_id, "device id saved");
        Ok(())
    }

    /// One-line summary for logs; the password is never included.
    pub fn describe(&self) -> String {
        let r = &self.record;
        let brand = if r.brand.is_empty() {
            "unset".to_string()
        } else {
            format!("{} (model {})", r.brand, r.model)
        };
        format!(
            "mqtt={}:{} user={} uuid={} userId={} deviceId={} sensor={}ms ghost={}ms brand={}",
            r.mqtt_server,
            r.mqtt_port,
            r.mqtt_user,
            r.device_uuid,
            r.user_id,
            self.device_id,
            r.sensor_interval_ms,
            r.ghost_window_ms,
            brand
        )
    }
}

fn read_slot<M: RecordMedium + ?Sized>(medium: &M, offset: usize) -> Result<u32, StoreError> {
    let mut buf = [0u8; 4];
    medium.read(offset, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use acir_hal::SimMedium;

    use super::*;

    const MAC: MacAddress = MacAddress([0xA4, 0xCF, 0x12, 0xB0, 0xC3, 0xD1]);

    fn fresh() -> (SharedMedium<SimMedium>, ConfigStore<SimMedium>) {
        let medium = Rc::new(RefCell::new(SimMedium::default()));
        let store = ConfigStore::new(medium.clone(), MAC, ConfigDefaults::default());
        (medium, store)
    }

    fn sample_record() -> ConfigRecord {
        ConfigRecord {
            mqtt_server: "mqtt.example.com".to_string(),
            mqtt_port: 8883,
            mqtt_user: "ac-unit".to_string(),
            mqtt_password: "s3cret!".to_string(),
            device_uuid: "ESP_TEST".to_string(),
            user_id: 4242,
            sensor_interval_ms: 15_000,
            ghost_window_ms: 20_000,
            brand: "GREE".to_string(),
            model: 3,
        }
    }

    fn slot(medium: &SharedMedium<SimMedium>, offset: usize) -> u32 {
        read_slot(&*medium.borrow(), offset).unwrap()
    }

    #[test]
    fn defaults_derive_uuid_from_mac() {
        let record = ConfigRecord::defaults(&ConfigDefaults::default(), &MAC);
        assert_eq!(record.device_uuid, "ESP_A4CF12B0C3D1");
        assert_eq!(record.mqtt_port, 1883);
        assert_eq!(record.user_id, 0);
        assert!(record.brand.is_empty());
        assert_eq!(record.model, 0);
    }

    #[test]
    fn encoded_record_has_fixed_offsets() {
        let bytes = sample_record().encode();
        assert_eq!(&bytes[..16], b"mqtt.example.com");
        assert_eq!(&bytes[64..66], &8883u16.to_le_bytes());
        assert_eq!(&bytes[194..198], &4242u32.to_le_bytes());
        assert_eq!(&bytes[206..210], b"GREE");
        assert_eq!(bytes[222], 3);
        assert_eq!(bytes[223], xor8(&bytes[..223]));
    }

    #[test]
    fn erased_medium_fails_validation_and_init_installs_defaults() {
        let (medium, mut store) = fresh();
        assert!(matches!(store.load(), Err(StoreError::Validation { .. })));

        assert_eq!(store.init().unwrap(), ConfigSource::Defaults);
        assert_eq!(store.config(), &ConfigRecord::defaults(&ConfigDefaults::default(), &MAC));
        assert_eq!(slot(&medium, USER_ID_SLOT), 0);
        assert_eq!(slot(&medium, DEVICE_ID_SLOT), 0);

        // Second boot finds the persisted defaults.
        let mut again = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert_eq!(again.init().unwrap(), ConfigSource::Stored);
        assert!(again.is_loaded());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (medium, mut store) = fresh();
        store.record = sample_record();
        store.save().unwrap();

        let mut reloaded = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert_eq!(reloaded.load().unwrap(), LoadOutcome::Loaded);
        assert_eq!(reloaded.config(), &sample_record());
    }

    #[test]
    fn consecutive_saves_are_byte_identical() {
        let (medium, mut store) = fresh();
        store.record = sample_record();
        store.save().unwrap();
        let first = medium.borrow().snapshot();
        store.save().unwrap();
        assert_eq!(medium.borrow().snapshot(), first);
    }

    #[test]
    fn any_single_byte_flip_is_detected() {
        let (medium, mut store) = fresh();
        store.record = sample_record();
        store.save().unwrap();
        let pristine = medium.borrow().snapshot();

        for i in 0..CONFIG_RECORD_LEN - 1 {
            let corrupted = Rc::new(RefCell::new(SimMedium::from_image(pristine.clone())));
            corrupted.borrow_mut().corrupt(CONFIG_BASE + i, 0x04);
            // Clear the redundant slot so no repair path is taken.
            corrupted
                .borrow_mut()
                .write_durable(USER_ID_SLOT, &0u32.to_le_bytes());

            let mut probe = ConfigStore::new(corrupted, MAC, ConfigDefaults::default());
            assert!(
                matches!(probe.load(), Err(StoreError::ChecksumMismatch { .. })),
                "flip at byte {i} went undetected"
            );
            assert_eq!(
                probe.config(),
                &ConfigRecord::defaults(&ConfigDefaults::default(), &MAC)
            );
        }
    }

    #[test]
    fn checksum_failure_recovers_user_id_from_redundant_slot() {
        let (medium, mut store) = fresh();
        store.record = sample_record();
        store.save().unwrap();
        medium.borrow_mut().corrupt(CONFIG_BASE + 10, 0xFF);

        let mut reloaded = ConfigStore::new(medium.clone(), MAC, ConfigDefaults::default());
        assert_eq!(
            reloaded.load().unwrap(),
            LoadOutcome::Repaired {
                user_id: 4242,
                persisted: true
            }
        );
        assert_eq!(reloaded.config().user_id, 4242);
        assert_eq!(reloaded.config().mqtt_server, "10.0.10.13");

        // The repaired record was persisted.
        let mut third = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert_eq!(third.load().unwrap(), LoadOutcome::Loaded);
        assert_eq!(third.config().user_id, 4242);
    }

    #[test]
    fn checksum_failure_with_erased_slot_reports_failure() {
        let (medium, mut store) = fresh();
        store.record = sample_record();
        store.save().unwrap();
        medium
            .borrow_mut()
            .write_durable(USER_ID_SLOT, &SLOT_ERASED.to_le_bytes());
        medium.borrow_mut().corrupt(CONFIG_BASE + 70, 0x01);

        let mut reloaded = ConfigStore::new(medium.clone(), MAC, ConfigDefaults::default());
        assert!(matches!(
            reloaded.load(),
            Err(StoreError::ChecksumMismatch { .. })
        ));
        assert_eq!(reloaded.config().user_id, 0);
        // Defaults were persisted during the failed load.
        let mut third = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert_eq!(third.load().unwrap(), LoadOutcome::Loaded);
    }

    #[test]
    fn valid_checksum_with_binary_garbage_fails_validation() {
        let (medium, _) = fresh();
        let mut bytes = sample_record().encode();
        bytes[0] = 0x07;
        bytes[CONFIG_RECORD_LEN - 1] = xor8(&bytes[..CONFIG_RECORD_LEN - 1]);
        medium.borrow_mut().write_durable(CONFIG_BASE, &bytes);

        let mut store = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert!(matches!(
            store.load(),
            Err(StoreError::Validation { region: Region::ConfigRecord, .. })
        ));
    }

    #[test]
    fn zero_port_fails_validation() {
        let (medium, _) = fresh();
        let mut record = sample_record();
        record.mqtt_port = 0;
        medium.borrow_mut().write_durable(CONFIG_BASE, &record.encode());

        let mut store = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert!(matches!(store.load(), Err(StoreError::Validation { .. })));
    }

    #[test]
    fn json_update_changes_fields_and_persists() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        let commits = medium.borrow().commit_count();

        let changed = store
            .update_from_json(
                r#"{"mqttServer":"broker.lan","mqttPort":1884,"brand":"MIDEA","model":7,"unknown":1}"#,
            )
            .unwrap();
        assert!(changed);
        assert_eq!(store.config().mqtt_server, "broker.lan");
        assert_eq!(store.config().mqtt_port, 1884);
        assert_eq!(store.config().brand, "MIDEA");
        assert_eq!(store.config().model, 7);
        assert_eq!(medium.borrow().commit_count(), commits + 1);

        let mut reloaded = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        reloaded.load().unwrap();
        assert_eq!(reloaded.config().mqtt_server, "broker.lan");
    }

    #[test]
    fn json_update_truncates_strings_to_capacity() {
        let (_, mut store) = fresh();
        store.init().unwrap();
        store
            .update_from_json(r#"{"brand":"AVERYLONGBRANDNAMEINDEED"}"#)
            .unwrap();
        assert_eq!(store.config().brand, "AVERYLONGBRANDN");
        assert_eq!(store.config().brand.len(), BRAND_CAP - 1);
    }

    #[test]
    fn json_update_without_known_keys_changes_nothing() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        let commits = medium.borrow().commit_count();

        assert!(!store.update_from_json(r#"{"colour":"blue"}"#).unwrap());
        assert_eq!(medium.borrow().commit_count(), commits);
    }

    #[test]
    fn malformed_json_has_no_side_effects() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        let before = store.config().clone();
        let commits = medium.borrow().commit_count();

        for doc in [
            r#"{"mqttServer":"x","mqttPort":"#,
            r#"{"mqttServer":"x","mqttPort":70000}"#,
            r#"{"mqttServer":"x","mqttPort":0}"#,
            r#"{"userId":-1}"#,
            "not json",
        ] {
            assert!(
                matches!(store.update_from_json(doc), Err(StoreError::Parse(_))),
                "{doc} should be rejected"
            );
        }
        assert_eq!(store.config(), &before);
        assert_eq!(medium.borrow().commit_count(), commits);
    }

    #[test]
    fn non_printable_strings_are_rejected_before_any_write() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        let before = store.config().clone();
        let commits = medium.borrow().commit_count();

        for doc in [
            r#"{"brand":"Caf\u00e9"}"#,
            r#"{"mqttUser":"a\tb"}"#,
            r#"{"mqttUser":"ad\u0000min"}"#,
            r#"{"mqttServer":"ok.example.com","deviceUUID":"ESP\n"}"#,
            r#"{"mqttPassword":"\u007f"}"#,
        ] {
            assert!(
                matches!(store.update_from_json(doc), Err(StoreError::Parse(_))),
                "{doc} should be rejected"
            );
        }
        assert_eq!(store.config(), &before);
        assert_eq!(medium.borrow().commit_count(), commits);

        assert!(store.update_from_json(r#"{"brand":""}"#).is_ok());
    }

    #[test]
    fn rejected_string_keeps_owner_binding_across_reboot() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        assert!(store.update_from_json(r#"{"userId":4242}"#).unwrap());
        assert!(store.update_from_json(r#"{"brand":"Café"}"#).is_err());

        let mut again = ConfigStore::new(medium.clone(), MAC, ConfigDefaults::default());
        assert_eq!(again.init().unwrap(), ConfigSource::Stored);
        assert_eq!(again.config().user_id, 4242);
        assert!(again.config().brand.is_empty());
    }

    #[test]
    fn json_device_id_goes_to_its_slot_only() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        let record_before = medium.borrow().read_vec(CONFIG_BASE, CONFIG_RECORD_LEN).unwrap();

        assert!(store.update_from_json(r#"{"deviceId":77}"#).unwrap());
        assert_eq!(store.device_id(), 77);
        assert_eq!(slot(&medium, DEVICE_ID_SLOT), 77);
        assert_eq!(
            medium.borrow().read_vec(CONFIG_BASE, CONFIG_RECORD_LEN).unwrap(),
            record_before
        );
    }

    #[test]
    fn save_user_id_commits_slot_without_rewriting_record() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        let record_before = medium.borrow().read_vec(CONFIG_BASE, CONFIG_RECORD_LEN).unwrap();

        store.save_user_id(99).unwrap();
        assert_eq!(store.config().user_id, 99);
        assert_eq!(slot(&medium, USER_ID_SLOT), 99);
        assert_eq!(
            medium.borrow().read_vec(CONFIG_BASE, CONFIG_RECORD_LEN).unwrap(),
            record_before
        );

        // The slot and the record now diverge; the record still verifies and
        // wins on the next load.
        let mut reloaded = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        assert_eq!(reloaded.load().unwrap(), LoadOutcome::Loaded);
        assert_eq!(reloaded.config().user_id, 0);
    }

    #[test]
    fn device_id_is_read_back_on_load() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        store.save_device_id(1234).unwrap();

        let mut reloaded = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        reloaded.load().unwrap();
        assert_eq!(reloaded.device_id(), 1234);
    }

    #[test]
    fn commit_failure_is_reported_and_memory_stays_authoritative() {
        let (medium, mut store) = fresh();
        store.init().unwrap();
        medium.borrow_mut().fail_next_commits(1);

        let result = store.update_from_json(r#"{"userId":5}"#);
        assert!(matches!(result, Err(StoreError::Commit(_))));
        assert_eq!(store.config().user_id, 5);

        // Explicit retry by the caller.
        store.save().unwrap();
        let mut reloaded = ConfigStore::new(medium, MAC, ConfigDefaults::default());
        reloaded.load().unwrap();
        assert_eq!(reloaded.config().user_id, 5);
    }

    #[test]
    fn reentrant_access_reports_busy() {
        let (medium, mut store) = fresh();
        let _held = medium.borrow_mut();
        assert_eq!(store.save(), Err(StoreError::Busy));
    }

    #[test]
    fn debug_and_describe_redact_password() {
        let (_, mut store) = fresh();
        store.record = sample_record();
        let debug = format!("{:?}", store.config());
        assert!(!debug.contains("s3cret!"));
        assert!(debug.contains("<redacted>"));
        let line = store.describe();
        assert!(!line.contains("s3cret!"));
        assert!(line.contains("GREE (model 3)"));

        let json = serde_json::to_value(store.config()).unwrap();
        assert!(json.get("mqttPassword").is_none());
        assert_eq!(json["deviceUUID"], "ESP_TEST");
    }
}

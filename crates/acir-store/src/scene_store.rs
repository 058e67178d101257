//! Scene Store.
//!
//! A fixed-capacity table of learned IR scenes.  Each scene pairs a raw
//! timing capture with the [`AcSetting`] it stands for, and carries its own
//! rotate-XOR checksum; the table as a whole carries an aggregate checksum.
//!
//! Loading is fail-fast: a bad aggregate, an impossible count or any single
//! bad entry rejects the whole table.  [`SceneStore::init`] then starts over
//! with an empty table.

use acir_hal::RecordMedium;
use acir_types::{AcMode, AcSetting, Region, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checksum::rotate_xor16;
use crate::layout::{
    FieldReader, FieldWriter, SCENE_TABLE_BASE, SharedMedium, is_printable_ascii, medium_mut,
    medium_ref, truncate_str,
};
use crate::matcher::{MatchPolicy, signals_match};

/// Maximum number of live scenes.
pub const SCENE_CAPACITY: usize = 7;

pub const SCENE_KEY_CAP: usize = 16;
pub const SCENE_RAW_CAP: usize = 448;
pub const SCENE_MODE_CAP: usize = 8;

/// Encoded size of one scene including its checksum.
pub const SCENE_LEN: usize = 476;

/// Encoded size of the whole table: count, slots, aggregate checksum.
pub const SCENE_TABLE_LEN: usize = 1 + SCENE_CAPACITY * SCENE_LEN + 2;

const AGGREGATE_OFFSET: usize = SCENE_TABLE_LEN - 2;

// ─────────────────────────────────────────────────────────────────────────────
// Scene
// ─────────────────────────────────────────────────────────────────────────────

/// A learned raw signal and the setting it represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scene {
    pub key: String,
    pub raw: String,
    #[serde(flatten)]
    pub setting: AcSetting,
}

impl Scene {
    pub fn encode(&self) -> [u8; SCENE_LEN] {
        let mut buf = [0u8; SCENE_LEN];
        let mut w = FieldWriter::new(&mut buf);
        w.put_str(&self.key, SCENE_KEY_CAP);
        w.put_str(&self.raw, SCENE_RAW_CAP);
        w.put_bool(self.setting.power);
        w.put_str(self.setting.mode.as_str(), SCENE_MODE_CAP);
        w.put_u8(self.setting.temperature);
        debug_assert_eq!(w.position(), SCENE_LEN - 2);

        let checksum = rotate_xor16(&buf[..SCENE_LEN - 2]);
        buf[SCENE_LEN - 2..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Verify and deserialize the scene stored in slot `index`.
    ///
    /// # Errors
    ///
    /// [`StoreError::ChecksumMismatch`] or [`StoreError::Validation`] tagged
    /// with [`Region::SceneEntry`].
    pub fn decode(bytes: &[u8; SCENE_LEN], index: u8) -> Result<Self, StoreError> {
        let region = Region::SceneEntry(index);
        let stored = u16::from_le_bytes([bytes[SCENE_LEN - 2], bytes[SCENE_LEN - 1]]);
        let computed = rotate_xor16(&bytes[..SCENE_LEN - 2]);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                region,
                stored,
                computed,
            });
        }

        let invalid = |reason: String| StoreError::Validation { region, reason };

        let mut r = FieldReader::new(bytes);
        let key = r.str_bytes(SCENE_KEY_CAP);
        let raw = r.str_bytes(SCENE_RAW_CAP);
        let power = r.u8();
        let mode = r.str_bytes(SCENE_MODE_CAP);
        let temperature = r.u8();

        if key.is_empty() || !is_printable_ascii(key) {
            return Err(invalid("key is empty or not printable".to_string()));
        }
        if raw.is_empty() || !is_printable_ascii(raw) {
            return Err(invalid("raw signal is empty or not printable".to_string()));
        }
        if power > 1 {
            return Err(invalid(format!("power byte {power:#04x}")));
        }
        let mode: AcMode = std::str::from_utf8(mode)
            .map_err(|_| invalid("mode is not text".to_string()))?
            .parse()
            .map_err(|e: StoreError| invalid(e.to_string()))?;
        let setting = AcSetting::new(power == 1, mode, temperature);
        setting.validate().map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            key: String::from_utf8_lossy(key).into_owned(),
            raw: String::from_utf8_lossy(raw).into_owned(),
            setting,
        })
    }
}

fn slot_offset(index: usize) -> usize {
    1 + index * SCENE_LEN
}

/// Serialize a full table.  Slots past `scenes.len()` are zero.
pub(crate) fn encode_table(scenes: &[Scene]) -> Vec<u8> {
    let mut buf = vec![0u8; SCENE_TABLE_LEN];
    buf[0] = scenes.len() as u8;
    for (i, scene) in scenes.iter().enumerate() {
        let at = slot_offset(i);
        buf[at..at + SCENE_LEN].copy_from_slice(&scene.encode());
    }
    let aggregate = rotate_xor16(&buf[..AGGREGATE_OFFSET]);
    buf[AGGREGATE_OFFSET..].copy_from_slice(&aggregate.to_le_bytes());
    buf
}

fn decode_table(buf: &[u8; SCENE_TABLE_LEN]) -> Result<Vec<Scene>, StoreError> {
    let stored = u16::from_le_bytes([buf[AGGREGATE_OFFSET], buf[AGGREGATE_OFFSET + 1]]);
    let computed = rotate_xor16(&buf[..AGGREGATE_OFFSET]);
    if stored != computed {
        return Err(StoreError::ChecksumMismatch {
            region: Region::SceneTable,
            stored,
            computed,
        });
    }

    let count = usize::from(buf[0]);
    if count > SCENE_CAPACITY {
        return Err(StoreError::Validation {
            region: Region::SceneTable,
            reason: format!("count {count} exceeds capacity {SCENE_CAPACITY}"),
        });
    }

    (0..count)
        .map(|i| {
            let at = slot_offset(i);
            let bytes = <&[u8; SCENE_LEN]>::try_from(&buf[at..at + SCENE_LEN])
                .map_err(|_| StoreError::Validation {
                    region: Region::SceneEntry(i as u8),
                    reason: "slot runs past the table".to_string(),
                })?;
            Scene::decode(bytes, i as u8)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Where a scene landed after [`SceneStore::add_scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted { index: usize },
    Updated { index: usize },
}

impl AddOutcome {
    pub fn index(self) -> usize {
        match self {
            AddOutcome::Inserted { index } | AddOutcome::Updated { index } => index,
        }
    }
}

/// Where the in-memory table came from after [`SceneStore::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneSource {
    Stored,
    Empty,
}

// ─────────────────────────────────────────────────────────────────────────────
// SceneStore
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of the in-memory scene table and its persisted copy.
pub struct SceneStore<M: RecordMedium> {
    medium: SharedMedium<M>,
    scenes: Vec<Scene>,
    policy: MatchPolicy,
}

impl<M: RecordMedium> SceneStore<M> {
    pub fn new(medium: SharedMedium<M>, policy: MatchPolicy) -> Self {
        Self {
            medium,
            scenes: Vec::with_capacity(SCENE_CAPACITY),
            policy,
        }
    }

    /// Load the stored table, or persist an empty one when it is unusable.
    ///
    /// # Errors
    ///
    /// Only a commit failure while persisting the empty table.
    pub fn init(&mut self) -> Result<SceneSource, StoreError> {
        match self.load() {
            Ok(()) => Ok(SceneSource::Stored),
            Err(e) => {
                warn!(error = %e, "no usable scene table, starting empty");
                self.scenes.clear();
                self.save()?;
                Ok(SceneSource::Empty)
            }
        }
    }

    /// Read and verify the whole table.  On failure the in-memory table is
    /// left untouched.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let mut buf = [0u8; SCENE_TABLE_LEN];
        medium_ref(&self.medium)?.read(SCENE_TABLE_BASE, &mut buf)?;
        let scenes = decode_table(&buf)?;
        info!(count = scenes.len(), "scene table loaded");
        self.scenes = scenes;
        Ok(())
    }

    /// Write the whole table and commit.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let buf = encode_table(&self.scenes);
        let mut medium = medium_mut(&self.medium)?;
        medium.stage(SCENE_TABLE_BASE, &buf)?;
        medium.commit()?;
        debug!(count = self.scenes.len(), "scene table saved");
        Ok(())
    }

    /// Insert a scene, or overwrite the one already stored under `key`.
    ///
    /// The key is truncated to its stored width before the lookup.  Raw
    /// signals longer than the slot are truncated.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidScene`] for an empty or non-printable key or
    ///   signal, or an out-of-range temperature.  Nothing is changed.
    /// - [`StoreError::CapacityExceeded`] when `key` is new and the table is
    ///   full.  Nothing is changed.
    /// - A commit failure after the in-memory table was updated.
    pub fn add_scene(
        &mut self,
        key: &str,
        raw: &str,
        setting: AcSetting,
    ) -> Result<AddOutcome, StoreError> {
        let key = truncate_str(key, SCENE_KEY_CAP - 1);
        if key.is_empty() || !is_printable_ascii(key.as_bytes()) {
            return Err(StoreError::InvalidScene(format!("bad scene key '{key}'")));
        }
        if raw.is_empty() || !is_printable_ascii(raw.as_bytes()) {
            return Err(StoreError::InvalidScene(
                "raw signal is empty or not printable".to_string(),
            ));
        }
        setting.validate()?;

        let stored_raw = truncate_str(raw, SCENE_RAW_CAP - 1);
        if stored_raw.len() < raw.len() {
            warn!(key, len = raw.len(), kept = stored_raw.len(), "raw signal truncated");
        }
        let scene = Scene {
            key: key.to_string(),
            raw: stored_raw.to_string(),
            setting,
        };

        let outcome = match self.scenes.iter().position(|s| s.key == key) {
            Some(index) => {
                self.scenes[index] = scene;
                AddOutcome::Updated { index }
            }
            None if self.scenes.len() >= SCENE_CAPACITY => {
                warn!(key, "scene table full");
                return Err(StoreError::CapacityExceeded {
                    capacity: SCENE_CAPACITY,
                });
            }
            None => {
                self.scenes.push(scene);
                AddOutcome::Inserted {
                    index: self.scenes.len() - 1,
                }
            }
        };

        info!(key, index = outcome.index(), "scene stored");
        self.save()?;
        Ok(outcome)
    }

    /// First scene, in slot order, whose signal matches `raw`.
    pub fn match_scene(&self, raw: &str) -> Option<&Scene> {
        self.scenes
            .iter()
            .find(|s| signals_match(raw, &s.raw, self.policy))
    }

    pub fn get_scene(&self, key: &str) -> Option<&Scene> {
        let key = truncate_str(key, SCENE_KEY_CAP - 1);
        self.scenes.iter().find(|s| s.key == key)
    }

    /// Drop every scene and persist the empty table.
    pub fn clear_scenes(&mut self) -> Result<(), StoreError> {
        info!(count = self.scenes.len(), "clearing scenes");
        self.scenes.clear();
        self.save()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Live scenes in slot order.
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: MatchPolicy) {
        self.policy = policy;
    }
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

    const SIGNAL: &str = "9000,4500,560,1680";

    fn cool(temp: u8) -> AcSetting {
        AcSetting::new(true, AcMode::Cool, temp)
    }

    fn fresh() -> (SharedMedium<SimMedium>, SceneStore<SimMedium>) {
        let medium = Rc::new(RefCell::new(SimMedium::default()));
        let mut store = SceneStore::new(medium.clone(), MatchPolicy::Exact);
        store.init().unwrap();
        (medium, store)
    }

    fn reload(medium: &SharedMedium<SimMedium>) -> (Result<(), StoreError>, SceneStore<SimMedium>) {
        let mut store = SceneStore::new(medium.clone(), MatchPolicy::Exact);
        (store.load(), store)
    }

    #[test]
    fn table_length_matches_layout() {
        assert_eq!(SCENE_TABLE_LEN, 3335);
        assert_eq!(AGGREGATE_OFFSET, 3333);
    }

    #[test]
    fn encoded_scene_has_fixed_offsets() {
        let scene = Scene {
            key: "living".to_string(),
            raw: SIGNAL.to_string(),
            setting: AcSetting::new(true, AcMode::Heat, 24),
        };
        let bytes = scene.encode();
        assert_eq!(&bytes[..7], b"living\0");
        assert_eq!(&bytes[16..16 + SIGNAL.len()], SIGNAL.as_bytes());
        assert_eq!(bytes[464], 1);
        assert_eq!(&bytes[465..470], b"heat\0");
        assert_eq!(bytes[473], 24);
        assert_eq!(
            u16::from_le_bytes([bytes[474], bytes[475]]),
            rotate_xor16(&bytes[..474])
        );
        assert_eq!(Scene::decode(&bytes, 0).unwrap(), scene);
    }

    #[test]
    fn zeroed_slot_is_rejected_not_decoded() {
        // An all-zero slot passes its checksum but carries an empty key.
        let err = Scene::decode(&[0u8; SCENE_LEN], 2).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation {
                region: Region::SceneEntry(2),
                ..
            }
        ));
    }

    #[test]
    fn erased_medium_initialises_an_empty_table() {
        let medium = Rc::new(RefCell::new(SimMedium::default()));
        let mut store = SceneStore::new(medium.clone(), MatchPolicy::Exact);
        assert!(store.load().unwrap_err().is_corruption());
        assert_eq!(store.init().unwrap(), SceneSource::Empty);
        assert!(store.is_empty());

        let (result, _) = reload(&medium);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn added_scenes_survive_reload() {
        let (medium, mut store) = fresh();
        store.add_scene("on", SIGNAL, cool(22)).unwrap();
        store
            .add_scene("off", "8900,4400,560,560", AcSetting::new(false, AcMode::Auto, 16))
            .unwrap();

        let (result, reloaded) = reload(&medium);
        result.unwrap();
        assert_eq!(reloaded.scenes(), store.scenes());
        assert!(!reloaded.get_scene("off").unwrap().setting.power);
    }

    #[test]
    fn capacity_boundary() {
        let (medium, mut store) = fresh();
        for i in 0..SCENE_CAPACITY {
            let outcome = store.add_scene(&format!("s{i}"), SIGNAL, cool(20)).unwrap();
            assert_eq!(outcome, AddOutcome::Inserted { index: i });
        }
        let commits = medium.borrow().commit_count();

        let err = store.add_scene("eighth", SIGNAL, cool(20)).unwrap_err();
        assert_eq!(err, StoreError::CapacityExceeded { capacity: 7 });
        assert_eq!(store.len(), SCENE_CAPACITY);
        assert!(store.get_scene("eighth").is_none());
        assert_eq!(medium.borrow().commit_count(), commits);

        // Updating an existing key still works on a full table.
        assert_eq!(
            store.add_scene("s3", SIGNAL, cool(30)).unwrap(),
            AddOutcome::Updated { index: 3 }
        );
    }

    #[test]
    fn upsert_keeps_count_and_slot() {
        let (_, mut store) = fresh();
        store.add_scene("a", SIGNAL, cool(20)).unwrap();
        store.add_scene("b", SIGNAL, cool(21)).unwrap();
        let outcome = store.add_scene("a", "1,2,3", cool(25)).unwrap();

        assert_eq!(outcome, AddOutcome::Updated { index: 0 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.scenes()[0].raw, "1,2,3");
        assert_eq!(store.scenes()[0].setting.temperature, 25);
    }

    #[test]
    fn long_key_is_truncated_before_uniqueness_check() {
        let (_, mut store) = fresh();
        store.add_scene("bedroom-cool-22-night", SIGNAL, cool(22)).unwrap();
        let outcome = store.add_scene("bedroom-cool-22-day", SIGNAL, cool(23)).unwrap();

        assert_eq!(outcome, AddOutcome::Updated { index: 0 });
        assert_eq!(store.scenes()[0].key, "bedroom-cool-22");
        assert!(store.get_scene("bedroom-cool-22-anything").is_some());
    }

    #[test]
    fn long_raw_signal_is_truncated() {
        let (medium, mut store) = fresh();
        let raw = "560,".repeat(200);
        store.add_scene("long", &raw, cool(20)).unwrap();
        assert_eq!(store.scenes()[0].raw.len(), SCENE_RAW_CAP - 1);

        let (result, reloaded) = reload(&medium);
        result.unwrap();
        assert_eq!(reloaded.scenes()[0].raw, store.scenes()[0].raw);
    }

    #[test]
    fn invalid_arguments_are_rejected_without_side_effects() {
        let (medium, mut store) = fresh();
        let commits = medium.borrow().commit_count();

        for (key, raw, setting) in [
            ("", SIGNAL, cool(20)),
            ("k", "", cool(20)),
            ("k", SIGNAL, cool(15)),
            ("k", SIGNAL, cool(31)),
            ("k\n", SIGNAL, cool(20)),
        ] {
            assert!(matches!(
                store.add_scene(key, raw, setting),
                Err(StoreError::InvalidScene(_))
            ));
        }
        assert!(store.is_empty());
        assert_eq!(medium.borrow().commit_count(), commits);
    }

    #[test]
    fn match_scene_is_exact_by_default_and_first_wins() {
        let (_, mut store) = fresh();
        store.add_scene("first", SIGNAL, cool(20)).unwrap();
        store.add_scene("second", SIGNAL, cool(26)).unwrap();

        assert_eq!(store.match_scene(SIGNAL).unwrap().key, "first");
        assert!(store.match_scene("9000,4500,560,1681").is_none());
    }

    #[test]
    fn tolerant_policy_recalls_drifted_capture() {
        let (_, mut store) = fresh();
        store.add_scene("on", SIGNAL, cool(20)).unwrap();
        store.set_policy(MatchPolicy::Tolerant { percent: 5 });

        assert_eq!(store.match_scene("9000,4500,560,1681").unwrap().key, "on");
        assert!(store.match_scene("9000,4500,700,1680").is_none());
    }

    #[test]
    fn bad_entry_fails_the_whole_load() {
        let (medium, mut store) = fresh();
        store.add_scene("a", SIGNAL, cool(20)).unwrap();
        store.add_scene("b", SIGNAL, cool(21)).unwrap();

        // Flip a byte inside entry 1, then fix up the aggregate so only the
        // entry checksum catches it.
        let mut table = encode_table(store.scenes());
        table[slot_offset(1) + 20] ^= 0x01;
        let aggregate = rotate_xor16(&table[..AGGREGATE_OFFSET]);
        table[AGGREGATE_OFFSET..].copy_from_slice(&aggregate.to_le_bytes());
        medium.borrow_mut().write_durable(SCENE_TABLE_BASE, &table);

        let (result, reloaded) = reload(&medium);
        assert!(matches!(
            result,
            Err(StoreError::ChecksumMismatch {
                region: Region::SceneEntry(1),
                ..
            })
        ));
        assert!(reloaded.is_empty());

        let mut recovered = SceneStore::new(medium.clone(), MatchPolicy::Exact);
        assert_eq!(recovered.init().unwrap(), SceneSource::Empty);
        assert!(recovered.is_empty());
    }

    #[test]
    fn aggregate_corruption_is_detected() {
        let (medium, mut store) = fresh();
        store.add_scene("a", SIGNAL, cool(20)).unwrap();
        medium
            .borrow_mut()
            .corrupt(SCENE_TABLE_BASE + AGGREGATE_OFFSET, 0x80);

        let (result, _) = reload(&medium);
        assert!(matches!(
            result,
            Err(StoreError::ChecksumMismatch {
                region: Region::SceneTable,
                ..
            })
        ));
    }

    #[test]
    fn impossible_count_fails_validation() {
        let (medium, _) = fresh();
        let mut table = encode_table(&[]);
        table[0] = 8;
        let aggregate = rotate_xor16(&table[..AGGREGATE_OFFSET]);
        table[AGGREGATE_OFFSET..].copy_from_slice(&aggregate.to_le_bytes());
        medium.borrow_mut().write_durable(SCENE_TABLE_BASE, &table);

        let (result, _) = reload(&medium);
        assert!(matches!(
            result,
            Err(StoreError::Validation {
                region: Region::SceneTable,
                ..
            })
        ));
    }

    #[test]
    fn unknown_mode_in_stored_entry_fails_validation() {
        let (medium, _) = fresh();
        let mut table = encode_table(&[Scene {
            key: "x".to_string(),
            raw: SIGNAL.to_string(),
            setting: cool(20),
        }]);
        let slot = slot_offset(0);
        table[slot + 465..slot + 470].copy_from_slice(b"warm\0");
        let checksum = rotate_xor16(&table[slot..slot + SCENE_LEN - 2]);
        table[slot + SCENE_LEN - 2..slot + SCENE_LEN].copy_from_slice(&checksum.to_le_bytes());
        let aggregate = rotate_xor16(&table[..AGGREGATE_OFFSET]);
        table[AGGREGATE_OFFSET..].copy_from_slice(&aggregate.to_le_bytes());
        medium.borrow_mut().write_durable(SCENE_TABLE_BASE, &table);

        let (result, _) = reload(&medium);
        assert!(matches!(
            result,
            Err(StoreError::Validation {
                region: Region::SceneEntry(0),
                ..
            })
        ));
    }

    #[test]
    fn clear_zeroes_every_slot() {
        let (medium, mut store) = fresh();
        store.add_scene("a", SIGNAL, cool(20)).unwrap();
        store.add_scene("b", SIGNAL, cool(21)).unwrap();
        store.clear_scenes().unwrap();
        assert!(store.is_empty());

        let table = medium
            .borrow()
            .read_vec(SCENE_TABLE_BASE, SCENE_TABLE_LEN)
            .unwrap();
        assert!(table[..AGGREGATE_OFFSET].iter().all(|&b| b == 0));
        let (result, reloaded) = reload(&medium);
        result.unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn commit_failure_is_reported_and_lost_on_power_cycle() {
        let (medium, mut store) = fresh();
        medium.borrow_mut().fail_next_commits(1);

        let err = store.add_scene("a", SIGNAL, cool(20)).unwrap_err();
        assert!(matches!(err, StoreError::Commit(_)));
        assert_eq!(store.len(), 1);

        medium.borrow_mut().power_cycle();
        let (result, reloaded) = reload(&medium);
        result.unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn scenes_serialize_with_flattened_setting() {
        let scene = Scene {
            key: "on".to_string(),
            raw: SIGNAL.to_string(),
            setting: cool(22),
        };
        let json = serde_json::to_value(&scene).unwrap();
        assert_eq!(json["mode"], "cool");
        assert_eq!(json["temperature"], 22);
        assert_eq!(json["power"], true);
    }
}

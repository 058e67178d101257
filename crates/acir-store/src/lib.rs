//! # acir-store
//!
//! Persistence for the air-conditioner IR controller: the device
//! configuration and the table of learned IR scenes, both held in memory and
//! written through to a byte-addressable [`RecordMedium`](acir_hal::RecordMedium).
//!
//! | Module           | Responsibility                                          |
//! |------------------|---------------------------------------------------------|
//! | [`layout`]       | Fixed offsets and field codecs of the 4 KiB region      |
//! | [`checksum`]     | `xor8` and `rotate_xor16` corruption detectors          |
//! | [`config_store`] | Checksummed config record and redundant id slots        |
//! | [`scene_store`]  | Fixed-capacity table of learned scenes                  |
//! | [`matcher`]      | Raw timing-sequence comparison                          |
//! | [`recall`]       | Receive-path listeners: teach mode and scene recall     |
//! | [`boot`]         | Boot-time bring-up of both stores on one medium         |

pub mod boot;
pub mod checksum;
pub mod config_store;
pub mod layout;
pub mod matcher;
pub mod recall;
pub mod scene_store;

pub use boot::{BootReport, DeviceStorage, ReceivePath};
pub use config_store::{ConfigDefaults, ConfigRecord, ConfigSource, ConfigStore, LoadOutcome};
pub use layout::SharedMedium;
pub use matcher::{MatchPolicy, signals_match};
pub use recall::{LEARNING_TIMEOUT_MS, LearnOutcome, LearningSession, SceneRecall, SharedScenes};
pub use scene_store::{AddOutcome, SCENE_CAPACITY, Scene, SceneSource, SceneStore};

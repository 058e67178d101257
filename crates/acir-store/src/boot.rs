//! Boot orchestration.
//!
//! [`DeviceStorage::boot`] puts both stores on one shared medium and brings
//! them up in order: Config Store first, then Scene Store.  Corruption is
//! healed locally; a commit failure while persisting the healed state is
//! recorded in the [`BootReport`] and boot carries on with the in-memory
//! state.

use std::cell::RefCell;
use std::rc::Rc;

use acir_hal::{ReceiveDispatcher, RecordMedium};
use acir_types::{MacAddress, StoreError};
use tracing::{info, warn};

use crate::config_store::{ConfigDefaults, ConfigSource, ConfigStore};
use crate::layout::SharedMedium;
use crate::matcher::MatchPolicy;
use crate::recall::{LearningSession, SceneRecall, SharedScenes};
use crate::scene_store::{SceneSource, SceneStore};

/// What boot found on the medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub config: ConfigSource,
    pub scenes: SceneSource,
    pub scene_count: usize,
    /// Commit failures hit while persisting healed state.
    pub persist_errors: Vec<StoreError>,
}

impl BootReport {
    /// `true` when both regions were used as stored.
    pub fn is_clean(&self) -> bool {
        self.config == ConfigSource::Stored
            && self.scenes == SceneSource::Stored
            && self.persist_errors.is_empty()
    }
}

/// Both stores over a single record medium.
pub struct DeviceStorage<M: RecordMedium> {
    medium: SharedMedium<M>,
    config: ConfigStore<M>,
    scenes: SharedScenes<M>,
}

impl<M: RecordMedium> DeviceStorage<M> {
    pub fn boot(
        medium: M,
        mac: MacAddress,
        defaults: ConfigDefaults,
        policy: MatchPolicy,
    ) -> (Self, BootReport) {
        let medium = Rc::new(RefCell::new(medium));
        let mut persist_errors = Vec::new();

        let mut config = ConfigStore::new(medium.clone(), mac, defaults);
        let config_source = config.init().unwrap_or_else(|e| {
            warn!(error = %e, "config defaults could not be persisted");
            persist_errors.push(e);
            ConfigSource::Defaults
        });

        let mut scenes = SceneStore::new(medium.clone(), policy);
        let scene_source = scenes.init().unwrap_or_else(|e| {
            warn!(error = %e, "empty scene table could not be persisted");
            persist_errors.push(e);
            SceneSource::Empty
        });

        let report = BootReport {
            config: config_source,
            scenes: scene_source,
            scene_count: scenes.len(),
            persist_errors,
        };
        info!(
            config = ?report.config,
            scenes = ?report.scenes,
            scene_count = report.scene_count,
            errors = report.persist_errors.len(),
            "storage booted"
        );

        let storage = Self {
            medium,
            config,
            scenes: Rc::new(RefCell::new(scenes)),
        };
        (storage, report)
    }

    pub fn config(&self) -> &ConfigStore<M> {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore<M> {
        &mut self.config
    }

    /// Handle on the scene store shared with the receive-path listeners.
    pub fn scenes(&self) -> &SharedScenes<M> {
        &self.scenes
    }

    pub fn medium(&self) -> &SharedMedium<M> {
        &self.medium
    }
}

/// Receive-path wiring: a dispatcher plus handles on its listeners.
pub struct ReceivePath<M: RecordMedium> {
    pub dispatcher: ReceiveDispatcher,
    pub learning: Rc<RefCell<LearningSession<M>>>,
    pub recall: Rc<RefCell<SceneRecall<M>>>,
}

impl<M: RecordMedium + 'static> DeviceStorage<M> {
    /// Register a [`LearningSession`] and then a [`SceneRecall`] on a fresh
    /// dispatcher.
    pub fn receive_path(&self) -> ReceivePath<M> {
        let learning = Rc::new(RefCell::new(LearningSession::new(self.scenes.clone())));
        let recall = Rc::new(RefCell::new(SceneRecall::new(self.scenes.clone())));

        let mut dispatcher = ReceiveDispatcher::new();
        dispatcher.register("learning", Box::new(learning.clone()));
        dispatcher.register("recall", Box::new(recall.clone()));

        ReceivePath {
            dispatcher,
            learning,
            recall,
        }
    }
}

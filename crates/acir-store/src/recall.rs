//! Receive-path listeners backed by the [`SceneStore`].
//!
//! - [`LearningSession`] – teach mode: the next capture after
//!   [`start`][LearningSession::start] is stored as a scene.
//! - [`SceneRecall`] – matches unrecognised captures against learned scenes.
//!
//! Register the learning session ahead of recall so a capture taken while
//! teaching never triggers a recall.

use std::cell::RefCell;
use std::rc::Rc;

use acir_hal::{Disposition, RecordMedium, SignalListener};
use acir_types::{AcSetting, SignalReceived, StoreError};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::layout::{is_printable_ascii, truncate_str};
use crate::scene_store::{SCENE_KEY_CAP, Scene, SceneStore};

/// How long teach mode waits for a capture.
pub const LEARNING_TIMEOUT_MS: i64 = 30_000;

/// Scene store shared between the application and its listeners.
pub type SharedScenes<M> = Rc<RefCell<SceneStore<M>>>;

// ─────────────────────────────────────────────────────────────────────────────
// LearningSession
// ─────────────────────────────────────────────────────────────────────────────

/// How a learning session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    Learned { key: String, index: usize },
    TimedOut { key: String },
    Failed { key: String, error: StoreError },
}

#[derive(Debug, Clone)]
struct PendingScene {
    key: String,
    setting: AcSetting,
    started: DateTime<Utc>,
}

pub struct LearningSession<M: RecordMedium> {
    scenes: SharedScenes<M>,
    pending: Option<PendingScene>,
    timeout: Duration,
    last_outcome: Option<LearnOutcome>,
}

impl<M: RecordMedium> LearningSession<M> {
    pub fn new(scenes: SharedScenes<M>) -> Self {
        Self::with_timeout(scenes, Duration::milliseconds(LEARNING_TIMEOUT_MS))
    }

    pub fn with_timeout(scenes: SharedScenes<M>, timeout: Duration) -> Self {
        Self {
            scenes,
            pending: None,
            timeout,
            last_outcome: None,
        }
    }

    /// Enter teach mode for `key`.  Any session already running is replaced.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidScene`] for an empty key or out-of-range setting.
    pub fn start(
        &mut self,
        key: &str,
        setting: AcSetting,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = truncate_str(key, SCENE_KEY_CAP - 1);
        if key.is_empty() {
            return Err(StoreError::InvalidScene("scene key is empty".to_string()));
        }
        if !is_printable_ascii(key.as_bytes()) {
            return Err(StoreError::InvalidScene("scene key must be printable ASCII".to_string()));
        }
        setting.validate()?;

        if let Some(previous) = self.pending.take() {
            warn!(previous = %previous.key, key, "replacing active learning session");
        }
        info!(key, mode = %setting.mode, temperature = setting.temperature, "learning started");
        self.pending = Some(PendingScene {
            key: key.to_string(),
            setting,
            started: now,
        });
        Ok(())
    }

    /// Leave teach mode without storing anything.  Returns the key that was
    /// being learned.
    pub fn stop(&mut self) -> Option<String> {
        let pending = self.pending.take()?;
        info!(key = %pending.key, "learning stopped");
        Some(pending.key)
    }

    pub fn is_learning(&self) -> bool {
        self.pending.is_some()
    }

    /// Key of the scene currently being learned.
    pub fn learning_key(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.key.as_str())
    }

    /// Expire the session once the timeout has elapsed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<LearnOutcome> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| now - p.started >= self.timeout);
        if !expired {
            return None;
        }
        let pending = self.pending.take()?;
        warn!(key = %pending.key, "learning timed out");
        let outcome = LearnOutcome::TimedOut { key: pending.key };
        self.last_outcome = Some(outcome.clone());
        Some(outcome)
    }

    pub fn last_outcome(&self) -> Option<&LearnOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn take_outcome(&mut self) -> Option<LearnOutcome> {
        self.last_outcome.take()
    }
}

impl<M: RecordMedium> SignalListener for LearningSession<M> {
    fn on_signal(&mut self, event: &SignalReceived) -> Result<Disposition, StoreError> {
        if self.tick(event.timestamp).is_some() || self.pending.is_none() {
            return Ok(Disposition::Pass);
        }

        let mut scenes = self.scenes.try_borrow_mut().map_err(|_| StoreError::Busy)?;
        let Some(pending) = self.pending.take() else {
            return Ok(Disposition::Pass);
        };

        let outcome = match scenes.add_scene(&pending.key, &event.raw, pending.setting) {
            Ok(added) => {
                info!(key = %pending.key, index = added.index(), event = %event.id, "scene learned");
                LearnOutcome::Learned {
                    key: pending.key,
                    index: added.index(),
                }
            }
            Err(error) => {
                warn!(key = %pending.key, error = %error, "learning failed");
                LearnOutcome::Failed {
                    key: pending.key,
                    error,
                }
            }
        };
        self.last_outcome = Some(outcome);
        Ok(Disposition::Consumed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SceneRecall
// ─────────────────────────────────────────────────────────────────────────────

/// Recalls learned scenes for captures no protocol decoder recognised.
pub struct SceneRecall<M: RecordMedium> {
    scenes: SharedScenes<M>,
    last_recalled: Option<Scene>,
    recalls: u64,
}

impl<M: RecordMedium> SceneRecall<M> {
    pub fn new(scenes: SharedScenes<M>) -> Self {
        Self {
            scenes,
            last_recalled: None,
            recalls: 0,
        }
    }

    pub fn last_recalled(&self) -> Option<&Scene> {
        self.last_recalled.as_ref()
    }

    pub fn take_recalled(&mut self) -> Option<Scene> {
        self.last_recalled.take()
    }

    /// Number of successful recalls so far.
    pub fn recalls(&self) -> u64 {
        self.recalls
    }
}

impl<M: RecordMedium> SignalListener for SceneRecall<M> {
    fn on_signal(&mut self, event: &SignalReceived) -> Result<Disposition, StoreError> {
        if !event.is_unrecognised() {
            return Ok(Disposition::Pass);
        }

        let scenes = self.scenes.try_borrow().map_err(|_| StoreError::Busy)?;
        match scenes.match_scene(&event.raw) {
            Some(scene) => {
                info!(
                    key = %scene.key,
                    power = scene.setting.power,
                    mode = %scene.setting.mode,
                    temperature = scene.setting.temperature,
                    "scene recalled"
                );
                self.last_recalled = Some(scene.clone());
                self.recalls += 1;
                Ok(Disposition::Consumed)
            }
            None => {
                debug!(len = event.raw.len(), "no scene matches capture");
                Ok(Disposition::Pass)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

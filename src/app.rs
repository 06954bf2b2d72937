//! Application core tying config, voice state, and broadcasting together.
//!
//! All mutations funnel through [`AppCore::refresh`], which resolves the
//! active group and speaking flag into a single authoritative
//! [`BroadcastState`], stores it, and pushes it to every overlay only when
//! something actually changed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::{ConfigStore, Group};
use crate::hub::BroadcastHub;
use crate::lock::lock_or_recover;
use crate::state::{BroadcastState, StateStore, TransitionConfig};
use crate::vad::VadParams;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("no avatar group with id {id}")]
    UnknownGroup { id: String },
}

pub struct AppCore {
    config: Arc<ConfigStore>,
    store: Arc<StateStore>,
    hub: Arc<BroadcastHub>,
    vad_params: Arc<VadParams>,
    speaking: AtomicBool,
    // Serializes store update + fan-out so concurrent writers (voice
    // forwarder, control loop) cannot broadcast in an order that differs
    // from the store's final value.
    publish: Mutex<()>,
}

impl AppCore {
    pub fn new(
        config: Arc<ConfigStore>,
        store: Arc<StateStore>,
        hub: Arc<BroadcastHub>,
        vad_params: Arc<VadParams>,
    ) -> Self {
        Self {
            config,
            store,
            hub,
            vad_params,
            speaking: AtomicBool::new(false),
            publish: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Switch the active avatar group. The new group's image (for the current
    /// speaking flag) is broadcast immediately.
    pub fn set_active_group(&self, id: &str) -> Result<Group, AppError> {
        let group = self
            .config
            .update(|settings| {
                let group = settings.group(id).cloned()?;
                settings.active_group_id = Some(group.id.clone());
                Some(group)
            })
            .ok_or_else(|| AppError::UnknownGroup { id: id.to_string() })?;
        info!("active group is now {} ({})", group.name, group.id);
        self.refresh();
        Ok(group)
    }

    /// Voice activity edge from the detector (or a manual override).
    pub fn set_speaking(&self, speaking: bool) {
        let previous = self.speaking.swap(speaking, Ordering::SeqCst);
        if previous != speaking {
            debug!("speaking -> {speaking}");
            self.refresh();
        }
    }

    /// Change the transition applied to subsequent pushes. Does not re-send
    /// the current image.
    pub fn set_transition(&self, transition: TransitionConfig) {
        self.config.update(|settings| {
            settings.default_transition = transition.style;
            settings.transition_duration = transition.duration_ms;
        });
        self.store.set_transition(transition);
    }

    /// Live-tune detection without restarting audio capture.
    pub fn set_voice_params(&self, threshold: Option<f32>, hold_ms: Option<u64>) {
        self.config.update(|settings| {
            if let Some(threshold) = threshold {
                settings.voice_threshold = threshold;
                self.vad_params.set_threshold(threshold);
            }
            if let Some(hold_ms) = hold_ms {
                settings.voice_hold_time = hold_ms;
                self.vad_params.set_hold_ms(hold_ms);
            }
        });
    }

    pub fn add_group(
        &self,
        name: String,
        idle_image: String,
        speaking_image: String,
        hotkey: Option<String>,
    ) -> Group {
        let was_empty = self.config.get().groups.is_empty();
        let group = self.config.add_group(name, idle_image, speaking_image, hotkey);
        // The first group ever created became active inside the store.
        if was_empty {
            self.refresh();
        }
        group
    }

    pub fn update_group(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Group),
    ) -> Result<Group, AppError> {
        let group = self
            .config
            .update_group(id, mutate)
            .ok_or_else(|| AppError::UnknownGroup { id: id.to_string() })?;
        // An edit to the active group may change the on-screen image.
        self.refresh();
        Ok(group)
    }

    pub fn delete_group(&self, id: &str) -> Result<(), AppError> {
        if !self.config.delete_group(id) {
            return Err(AppError::UnknownGroup { id: id.to_string() });
        }
        self.refresh();
        Ok(())
    }

    pub fn groups(&self) -> Vec<Group> {
        self.config.get().groups
    }

    /// Recompute the authoritative state and broadcast it if it changed.
    ///
    /// The store write and the fan-out happen under one lock. Without it,
    /// two threads refreshing concurrently could leave the store holding
    /// one state while every overlay last saw the other; sends are channel
    /// pushes, so the lock never spans network I/O.
    pub fn refresh(&self) {
        let _publish = lock_or_recover(&self.publish, "publish");
        let settings = self.config.get();
        let Some(group) = settings.active_group() else {
            return;
        };
        let speaking = self.is_speaking();
        let image = if speaking {
            group.speaking_image.clone()
        } else {
            group.idle_image.clone()
        };
        let state = BroadcastState {
            group_id: group.id.clone(),
            group_name: group.name.clone(),
            image,
            is_speaking: speaking,
        };
        if self.store.set(state.clone()) {
            self.hub.broadcast(state, self.store.transition());
        }
    }
}

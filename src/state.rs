//! Single authoritative broadcast state so every overlay converges on one value.
//!
//! The store holds the one mutable value shared between the application layer
//! (writer) and the broadcast hub (reader): the currently displayed avatar
//! state plus the active transition config. Writes are wholesale replacements,
//! never field patches, so readers always see a consistent snapshot.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::lock::lock_or_recover;

/// What every overlay client should currently be rendering.
///
/// Serialized camelCase to match the on-disk config and wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastState {
    /// Id of the selected group.
    pub group_id: String,
    /// Denormalized display name of the selected group.
    pub group_name: String,
    /// Image filename already resolved for the current speaking flag.
    pub image: String,
    /// Whether the streamer is currently speaking.
    pub is_speaking: bool,
}

/// Visual animation applied when the displayed image changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransitionStyle {
    /// Swap the image with no animation.
    #[default]
    Instant,
    Fade,
    Slide,
}

impl TransitionStyle {
    /// CSS-style class prefix used by overlay renderers (`fade-out`, `slide-in`).
    pub fn class_prefix(self) -> &'static str {
        match self {
            TransitionStyle::Instant => "instant",
            TransitionStyle::Fade => "fade",
            TransitionStyle::Slide => "slide",
        }
    }
}

impl std::fmt::Display for TransitionStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.class_prefix())
    }
}

/// Transition style plus its per-phase duration.
///
/// Read on every broadcast; changing it affects the next broadcast only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub style: TransitionStyle,
    pub duration_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            style: TransitionStyle::Instant,
            duration_ms: 300,
        }
    }
}

struct StoreInner {
    state: Option<BroadcastState>,
    transition: TransitionConfig,
}

/// Owner of the current [`BroadcastState`].
///
/// One writer (the application layer), many readers (hub fan-out and the
/// fallback pull endpoint). The lock is held only for the snapshot copy,
/// never across I/O.
pub struct StateStore {
    inner: Mutex<StoreInner>,
}

impl StateStore {
    pub fn new(transition: TransitionConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                state: None,
                transition,
            }),
        }
    }

    /// Replace the state wholesale. Returns whether the stored value changed,
    /// so callers can suppress redundant broadcasts.
    pub fn set(&self, new_state: BroadcastState) -> bool {
        let mut inner = lock_or_recover(&self.inner, "state store set");
        if inner.state.as_ref() == Some(&new_state) {
            return false;
        }
        inner.state = Some(new_state);
        true
    }

    /// Current state, or `None` before any group has been selected.
    pub fn get(&self) -> Option<BroadcastState> {
        lock_or_recover(&self.inner, "state store get").state.clone()
    }

    pub fn transition(&self) -> TransitionConfig {
        lock_or_recover(&self.inner, "state store transition").transition
    }

    pub fn set_transition(&self, transition: TransitionConfig) {
        lock_or_recover(&self.inner, "state store set transition").transition = transition;
    }

    /// State and transition read under one lock acquisition, used for
    /// snapshot-on-join so a joining client never sees a torn pair.
    pub fn snapshot(&self) -> (Option<BroadcastState>, TransitionConfig) {
        let inner = lock_or_recover(&self.inner, "state store snapshot");
        (inner.state.clone(), inner.transition)
    }
}

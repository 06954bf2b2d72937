//! Typed JSON control protocol so desktop shells drive the core process.
//!
//! Messages are newline-delimited JSON on stdin/stdout. Commands carry a
//! `"cmd"` tag, events a `"event"` tag.

use serde::{Deserialize, Serialize};

use crate::config::Group;
use crate::state::{BroadcastState, TransitionStyle};

// ============================================================================
// Control Events (core → shell)
// ============================================================================

/// Events emitted on stdout, one JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ControlEvent {
    /// Sent once on startup after the server is bound.
    #[serde(rename = "ready")]
    Ready {
        /// Semantic version of the running core.
        version: String,
        /// Port the overlay server actually bound.
        port: u16,
        /// Address browser overlays should open.
        overlay_url: String,
        /// Active input-device label when voice detection is running.
        input_device: Option<String>,
        /// All configured avatar groups.
        groups: Vec<Group>,
        /// Currently active group id, if any group exists.
        active_group_id: Option<String>,
    },

    /// Mirrors every overlay broadcast so the shell can track the live state.
    #[serde(rename = "state_changed")]
    StateChanged {
        state: BroadcastState,
        transition: TransitionStyle,
        duration: u64,
    },

    /// Group list after any create/update/delete.
    #[serde(rename = "group_list")]
    GroupList {
        groups: Vec<Group>,
        active_group_id: Option<String>,
    },

    /// Snapshot of the live runtime in response to `get_status`.
    #[serde(rename = "status")]
    Status {
        is_speaking: bool,
        active_group_id: Option<String>,
        transition: TransitionStyle,
        transition_duration: u64,
        /// Overlay subscribers currently connected.
        connected_overlays: usize,
    },

    /// Error (recoverable or fatal).
    #[serde(rename = "error")]
    Error {
        /// Human-readable error description.
        message: String,
        /// Whether the shell may continue without restarting the core.
        recoverable: bool,
    },
}

// ============================================================================
// Control Commands (shell → core)
// ============================================================================

/// Commands received on stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd")]
pub enum ControlCommand {
    /// Switch the active avatar group.
    #[serde(rename = "set_group")]
    SetGroup { id: String },

    /// Force the speaking flag, e.g. for a push-to-talk shell.
    #[serde(rename = "set_speaking")]
    SetSpeaking { speaking: bool },

    /// Change the transition applied to subsequent state pushes.
    #[serde(rename = "set_transition")]
    SetTransition {
        style: TransitionStyle,
        #[serde(default)]
        duration: Option<u64>,
    },

    /// Live-tune voice detection.
    #[serde(rename = "set_voice")]
    SetVoice {
        #[serde(default)]
        threshold: Option<f32>,
        #[serde(default)]
        hold_ms: Option<u64>,
    },

    /// Create a group.
    #[serde(rename = "add_group")]
    AddGroup {
        name: String,
        idle_image: String,
        speaking_image: String,
        #[serde(default)]
        hotkey: Option<String>,
    },

    /// Edit an existing group; absent fields are left untouched.
    #[serde(rename = "update_group")]
    UpdateGroup {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        idle_image: Option<String>,
        #[serde(default)]
        speaking_image: Option<String>,
        #[serde(default)]
        hotkey: Option<String>,
    },

    /// Delete a group.
    #[serde(rename = "delete_group")]
    DeleteGroup { id: String },

    /// Request a status event.
    #[serde(rename = "get_status")]
    GetStatus,
}

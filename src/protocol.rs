//! Wire protocol between the broadcast server and overlay clients.
//!
//! Exactly one push message type (`state`) is defined today. Messages carry a
//! `"type"` tag so future message kinds can be added without breaking old
//! clients: anything a client does not recognize decodes to [`OverlayMessage::Unknown`]
//! and is ignored.

use serde::{Deserialize, Serialize};

use crate::state::{BroadcastState, TransitionConfig, TransitionStyle};

/// Server → overlay push message over the persistent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayMessage {
    /// Full replacement of what the overlay should render.
    #[serde(rename = "state")]
    State {
        data: BroadcastState,
        transition: TransitionStyle,
        duration: u64,
    },
    /// Forward-compatibility catch-all; clients drop these silently.
    #[serde(other)]
    Unknown,
}

impl OverlayMessage {
    pub fn state(data: BroadcastState, transition: TransitionConfig) -> Self {
        OverlayMessage::State {
            data,
            transition: transition.style,
            duration: transition.duration_ms,
        }
    }
}

/// Response of the fallback pull endpoint (`GET /api/current`).
///
/// `state` is `null` until the first group has ever been selected; clients
/// keep their idle display in that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    pub state: Option<BroadcastState>,
    pub transition: TransitionStyle,
    pub duration: u64,
}

impl CurrentState {
    pub fn new(state: Option<BroadcastState>, transition: TransitionConfig) -> Self {
        Self {
            state,
            transition: transition.style,
            duration: transition.duration_ms,
        }
    }
}

//! Shared AvatarCast library exports that keep binaries aligned on common behavior.

pub mod app;
pub mod cli;
pub mod config;
pub mod control;
pub mod hub;
mod lock;
pub mod overlay;
pub mod protocol;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod vad;

pub use app::{AppCore, AppError};
pub use hub::{BroadcastHub, ClientId};
pub use state::{BroadcastState, StateStore, TransitionConfig, TransitionStyle};

//! Overlay rendering model and the native client that drives it.
//!
//! [`renderer`] is the pure display state machine (current image, visibility,
//! two-phase transitions) so it can be tested with injected clocks.
//! [`client`] owns the network side: the persistent WebSocket subscription,
//! the reconnect schedule, and the fallback state pull.

pub mod client;
pub mod renderer;

pub use client::{ClientError, OverlayClient, ReconnectSchedule, RECONNECT_DELAY};
pub use renderer::OverlayElement;

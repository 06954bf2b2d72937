//! Voice-activity detection: level sampling, thresholding, and hysteresis.
//!
//! Split so the signal path stays testable without hardware: [`meter`] turns
//! raw PCM into a smoothed 0-100 level, [`gate`] turns levels into debounced
//! speaking/idle transitions, and [`detector`] owns the cpal capture thread
//! that drives both. The hosting application subscribes to [`VadEvent`]s and
//! wires speaking transitions into state updates; this module knows nothing
//! about groups or broadcasting.

mod detector;
mod gate;
mod meter;

pub use detector::{list_input_devices, VadEvent, VadParams, VoiceActivityDetector};
pub use gate::{SpeakingGate, SpeakingTransition};
pub use meter::LevelMeter;

/// Microphone acquisition failure. Surfaced to the operator; the detector
/// stays stopped and never retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("audio input unavailable: {reason}")]
    DeviceUnavailable { reason: String },
}

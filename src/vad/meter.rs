//! Smoothed RMS loudness meter normalized to the 0-100 scale the gate and UI
//! consume.

/// Smoothing factor matching the original analyser behavior: 80% of the
/// previous reading carries over each tick.
pub const DEFAULT_SMOOTHING: f32 = 0.8;

/// Full-scale reference: an RMS of half amplitude maps to level 100, so
/// ordinary speech uses most of the scale.
const REFERENCE_RMS: f32 = 0.5;

#[derive(Debug)]
pub struct LevelMeter {
    smoothing: f32,
    smoothed_rms: f32,
}

impl LevelMeter {
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 0.99),
            smoothed_rms: 0.0,
        }
    }

    /// Feed one tick worth of mono f32 PCM and get the current level (0-100).
    ///
    /// An empty tick (no samples delivered since the last one) decays toward
    /// silence rather than holding the old level forever.
    pub fn level(&mut self, samples: &[f32]) -> f32 {
        let rms = if samples.is_empty() {
            0.0
        } else {
            let energy: f32 =
                samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
            energy.sqrt()
        };
        self.smoothed_rms = self.smoothing * self.smoothed_rms + (1.0 - self.smoothing) * rms;
        (self.smoothed_rms / REFERENCE_RMS * 100.0).min(100.0)
    }

    pub fn reset(&mut self) {
        self.smoothed_rms = 0.0;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

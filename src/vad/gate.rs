//! Threshold-plus-hold-time gate that turns noisy level readings into clean
//! speaking/idle transitions.
//!
//! Going loud flips to speaking immediately; going quiet only flips back to
//! idle after `hold_ms` of uninterrupted sub-threshold samples. Levels that
//! oscillate around the threshold therefore cannot chatter the output.

/// One state change of the gate. Emitted exactly once per actual change,
/// never once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakingTransition {
    Started,
    Stopped,
}

#[derive(Debug)]
pub struct SpeakingGate {
    threshold: f32,
    hold_ms: u64,
    is_speaking: bool,
    pending_silence_since: Option<u64>,
}

impl SpeakingGate {
    pub fn new(threshold: f32, hold_ms: u64) -> Self {
        Self {
            threshold,
            hold_ms,
            is_speaking: false,
            pending_silence_since: None,
        }
    }

    /// Feed one level sample (0-100) taken at `now_ms`.
    pub fn on_level(&mut self, level: f32, now_ms: u64) -> Option<SpeakingTransition> {
        if level > self.threshold {
            // Any loud sample cancels a pending idle timer.
            self.pending_silence_since = None;
            if !self.is_speaking {
                self.is_speaking = true;
                return Some(SpeakingTransition::Started);
            }
            return None;
        }
        if !self.is_speaking {
            return None;
        }
        match self.pending_silence_since {
            None => {
                self.pending_silence_since = Some(now_ms);
                None
            }
            Some(since) if now_ms.saturating_sub(since) >= self.hold_ms => {
                self.is_speaking = false;
                self.pending_silence_since = None;
                Some(SpeakingTransition::Stopped)
            }
            Some(_) => None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Live parameter updates; apply from the next sample on.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn set_hold_ms(&mut self, hold_ms: u64) {
        self.hold_ms = hold_ms;
    }

    /// Forget any in-flight hold timer, used when capture stops.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.pending_silence_since = None;
    }
}

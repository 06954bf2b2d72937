//! Transition state machine for one rendered overlay element.
//!
//! Mirrors what the browser overlay does with CSS classes, but driven by an
//! injected millisecond clock so the exact phase timing is testable: a
//! two-phase transition shows the old image with a `<style>-out` class for
//! one duration, then the new image with `<style>-in` for another, then no
//! class at all. Instant style skips both phases.

use crate::state::{BroadcastState, TransitionStyle};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Steady,
    FadingOut {
        until_ms: u64,
        next: String,
        style: TransitionStyle,
        duration_ms: u64,
    },
    FadingIn {
        until_ms: u64,
        style: TransitionStyle,
    },
}

#[derive(Debug)]
pub struct OverlayElement {
    src: Option<String>,
    visible: bool,
    phase: Phase,
}

impl OverlayElement {
    pub fn new() -> Self {
        Self {
            src: None,
            visible: false,
            phase: Phase::Steady,
        }
    }

    /// Image filename currently rendered, if any.
    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Active transition class (`fade-out`, `slide-in`, ...), when animating.
    pub fn transition_class(&self) -> Option<String> {
        match &self.phase {
            Phase::Steady => None,
            Phase::FadingOut { style, .. } => Some(format!("{}-out", style.class_prefix())),
            Phase::FadingIn { style, .. } => Some(format!("{}-in", style.class_prefix())),
        }
    }

    /// Apply a received state push. Returns whether anything visible changed.
    pub fn apply(
        &mut self,
        state: &BroadcastState,
        style: TransitionStyle,
        duration_ms: u64,
        now_ms: u64,
    ) -> bool {
        let target = state.image.as_str();

        // Redundant push: already showing (or already transitioning to) the
        // requested image. Client-side dedup on top of hub-level suppression.
        if self.visible && self.targets(target) {
            return false;
        }

        if style == TransitionStyle::Instant {
            self.src = Some(target.to_string());
            self.visible = true;
            self.phase = Phase::Steady;
            return true;
        }

        if self.visible {
            self.phase = Phase::FadingOut {
                until_ms: now_ms + duration_ms,
                next: target.to_string(),
                style,
                duration_ms,
            };
        } else {
            // From hidden there is nothing to animate out; one phase only.
            self.src = Some(target.to_string());
            self.visible = true;
            self.phase = Phase::FadingIn {
                until_ms: now_ms + duration_ms,
                style,
            };
        }
        true
    }

    /// Advance the clock. Returns whether anything visible changed.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        match self.phase.clone() {
            Phase::Steady => false,
            Phase::FadingOut {
                until_ms,
                next,
                style,
                duration_ms,
            } => {
                if now_ms < until_ms {
                    return false;
                }
                self.src = Some(next);
                // Second phase is anchored to the first phase's end, not the
                // tick that observed it, so slow ticks don't stretch totals.
                self.phase = Phase::FadingIn {
                    until_ms: until_ms + duration_ms,
                    style,
                };
                true
            }
            Phase::FadingIn { until_ms, .. } => {
                if now_ms < until_ms {
                    return false;
                }
                self.phase = Phase::Steady;
                true
            }
        }
    }

    fn targets(&self, image: &str) -> bool {
        match &self.phase {
            Phase::FadingOut { next, .. } => next == image,
            _ => self.src.as_deref() == Some(image),
        }
    }
}

impl Default for OverlayElement {
    fn default() -> Self {
        Self::new()
    }
}

use crate::assembly::ChannelId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatchConfig {
    /// Minimum dominance contrast (top minus runner-up).
    pub dominance_threshold: f32,
    /// Minimum inhibitory relief.
    pub relief_threshold: f32,
    /// Consecutive qualifying ticks required before committing.
    pub sustain_steps: u32,
}

impl Default for LatchConfig {
    fn default() -> Self {
        Self {
            dominance_threshold: 0.55,
            relief_threshold: 0.40,
            sustain_steps: 25,
        }
    }
}

impl LatchConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let fin = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        Self {
            dominance_threshold: fin(self.dominance_threshold, d.dominance_threshold)
                .clamp(0.0, 1.0),
            relief_threshold: fin(self.relief_threshold, d.relief_threshold).clamp(0.0, 1.0),
            // Two is the floor: a decision can never land on the same tick
            // the coincidence first appears.
            sustain_steps: self.sustain_steps.max(2),
        }
    }
}

/// Once-only record of the committed decision. Immutable after creation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecisionState {
    pub step: u64,
    pub time: f64,
    pub winner_channel: ChannelId,
    pub dominance_contrast: f32,
    pub relief_at_commit: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LatchPhase {
    Idle,
    Arming,
    Committed,
}

/// What the latch sees on one tick. Must come from the same tick's
/// competition pass — never a stale one.
#[derive(Debug, Clone, Copy)]
pub struct LatchInputs<'a> {
    pub winner: &'a ChannelId,
    pub contrast: f32,
    pub relief: f32,
    pub step: u64,
    pub time: f64,
}

/// Irreversible decision-commitment state machine.
///
/// Contrast and relief must both sit at or above threshold for
/// `sustain_steps` consecutive ticks; one shared counter, reset jointly
/// whenever either condition lapses. `Committed` is absorbing until an
/// explicit episode reset.
#[derive(Debug, Clone)]
pub struct DecisionLatch {
    cfg: LatchConfig,
    held: u32,
    decision: Option<DecisionState>,
}

impl DecisionLatch {
    pub fn new(cfg: LatchConfig) -> Self {
        Self {
            cfg: cfg.sanitized(),
            held: 0,
            decision: None,
        }
    }

    pub fn config(&self) -> &LatchConfig {
        &self.cfg
    }

    pub fn phase(&self) -> LatchPhase {
        if self.decision.is_some() {
            LatchPhase::Committed
        } else if self.held > 0 {
            LatchPhase::Arming
        } else {
            LatchPhase::Idle
        }
    }

    /// `None` until a decision has been committed.
    pub fn decision(&self) -> Option<&DecisionState> {
        self.decision.as_ref()
    }

    /// Ticks the coincidence has currently been held.
    pub fn held_steps(&self) -> u32 {
        self.held
    }

    /// Consume one tick's observation. Returns true exactly once: on the
    /// tick the latch commits.
    pub fn evaluate(&mut self, inputs: LatchInputs<'_>) -> bool {
        if self.decision.is_some() {
            return false;
        }

        let qualifying = inputs.contrast >= self.cfg.dominance_threshold
            && inputs.relief >= self.cfg.relief_threshold;
        if !qualifying {
            // Either condition lapsing resets the shared counter.
            // No partial credit.
            self.held = 0;
            return false;
        }

        if self.held == 0 {
            // First qualifying tick only starts the counter.
            self.held = 1;
            return false;
        }

        self.held += 1;
        if self.held < self.cfg.sustain_steps {
            return false;
        }

        self.decision = Some(DecisionState {
            step: inputs.step,
            time: inputs.time,
            winner_channel: inputs.winner.clone(),
            dominance_contrast: inputs.contrast,
            relief_at_commit: inputs.relief,
        });
        self.held = 0;
        true
    }

    /// Explicit episode boundary: drop the decision and re-arm.
    pub fn reset_for_episode(&mut self) {
        self.held = 0;
        self.decision = None;
    }
}

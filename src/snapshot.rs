use crate::arbiter::Arbiter;
use crate::assembly::ChannelId;
use crate::latch::{DecisionState, LatchPhase};
use crate::modulation::ModulatorSnapshot;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cheap per-tick counters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Diagnostics {
    pub assembly_count: usize,
    pub channel_count: usize,
    pub total_output: f32,
    pub inhibition_last_tick: f32,
}

/// A read-only snapshot of the arbitration state.
///
/// Design intent:
/// - Observers cannot mutate or steer the engine.
/// - Snapshotting is on-demand and can allocate; the tick loop stays
///   unchanged.
/// - Two snapshots taken without an intervening tick are identical.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArbiterSnapshot {
    pub step: u64,
    pub time: f64,
    pub phase: LatchPhase,
    pub winner: Option<ChannelId>,
    pub contrast: f32,
    pub relief: f32,
    pub dominance: Vec<(ChannelId, f32)>,
    pub instantaneous: Vec<(ChannelId, f32)>,
    /// `None` means "no decision yet" — never a placeholder decision.
    pub decision: Option<DecisionState>,
    pub modulators: Vec<ModulatorSnapshot>,
    pub diagnostics: Diagnostics,
}

pub struct ArbiterAdapter<'a> {
    arbiter: &'a Arbiter,
}

impl<'a> ArbiterAdapter<'a> {
    pub fn new(arbiter: &'a Arbiter) -> Self {
        Self { arbiter }
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        let arb = self.arbiter;
        ArbiterSnapshot {
            step: arb.step(),
            time: arb.time(),
            phase: arb.phase(),
            winner: arb.winner().cloned(),
            contrast: arb.contrast(),
            relief: arb.relief(),
            dominance: arb.kernel().dominance_map(),
            instantaneous: arb.kernel().instantaneous_map(),
            decision: arb.decision().cloned(),
            modulators: arb.modulators().iter().map(|m| m.snapshot()).collect(),
            diagnostics: Diagnostics {
                assembly_count: arb.assembly_count(),
                channel_count: arb.kernel().channel_count(),
                total_output: arb.total_output(),
                inhibition_last_tick: arb.kernel().inhibition_last_tick(),
            },
        }
    }

    /// Dominance of a named channel; `None` for channels that do not
    /// exist, so "absent" can never be mistaken for "zero".
    pub fn dominance_of(&self, channel: &str) -> Option<f32> {
        self.arbiter.kernel().dominance(&ChannelId::new(channel))
    }
}

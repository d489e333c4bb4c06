//! Modulatory governance: bounded slow signals gated by a refusal-only
//! policy, with an append-only trace of every proposal.
//!
//! Every pressure source that is allowed to touch arbitration (value,
//! urgency, salience) goes through one of these. The policy can shrink or
//! refuse a proposed change; it can never amplify one. Consumers read the
//! signal; they never write it. This is what keeps a modulatory subsystem
//! from becoming a covert second decision-maker.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ModulatorKind {
    Value,
    Urgency,
    Salience,
}

impl ModulatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModulatorKind::Value => "value",
            ModulatorKind::Urgency => "urgency",
            ModulatorKind::Salience => "salience",
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModulatorConfig {
    pub enabled: bool,
    pub min: f32,
    pub max: f32,
    /// Where the signal decays back to when nobody feeds it.
    pub rest: f32,
    /// Decay time constant, in the same time units as `dt`.
    pub decay_tau: f32,
    /// Largest accepted change per proposal.
    pub max_step_change: f32,
    /// Minimum steps between two accepted proposals.
    pub min_interval_steps: u64,
    /// Coupling strength into the arbitration path. How the weight is
    /// applied is the consumer's business; the bound lives here.
    pub weight: f32,
}

impl Default for ModulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min: 0.0,
            max: 1.0,
            rest: 0.0,
            decay_tau: 20.0,
            max_step_change: 0.25,
            min_interval_steps: 10,
            weight: 0.3,
        }
    }
}

impl ModulatorConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let fin = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        let min = fin(self.min, d.min);
        let max = fin(self.max, d.max).max(min);
        Self {
            enabled: self.enabled,
            min,
            max,
            rest: fin(self.rest, d.rest).clamp(min, max),
            decay_tau: fin(self.decay_tau, d.decay_tau).max(1e-3),
            max_step_change: fin(self.max_step_change, d.max_step_change).max(0.0),
            min_interval_steps: self.min_interval_steps,
            weight: fin(self.weight, d.weight).max(0.0),
        }
    }
}

/// Bounded slow scalar. Owned by its modulator; mutated only through the
/// policy gate below.
#[derive(Debug, Clone)]
pub struct ModulatorySignal {
    value: f32,
    min: f32,
    max: f32,
    rest: f32,
    decay_tau: f32,
    enabled: bool,
}

impl ModulatorySignal {
    fn new(cfg: &ModulatorConfig) -> Self {
        Self {
            value: cfg.rest,
            min: cfg.min,
            max: cfg.max,
            rest: cfg.rest,
            decay_tau: cfg.decay_tau,
            enabled: cfg.enabled,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Relax toward rest. Called once per tick by the owning modulator.
    fn advance(&mut self, dt: f32) {
        let alpha = (dt / self.decay_tau).min(1.0);
        self.value += alpha * (self.rest - self.value);
        self.value = self.value.clamp(self.min, self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PolicyReason {
    /// Delta applied as proposed.
    Applied,
    /// Delta accepted after being shrunk to policy bounds.
    Trimmed,
    Disabled,
    /// Rejected: too soon after the last accepted update.
    TooSoon,
    /// Rejected: non-finite proposal.
    NonFinite,
}

impl PolicyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyReason::Applied => "applied",
            PolicyReason::Trimmed => "trimmed",
            PolicyReason::Disabled => "disabled",
            PolicyReason::TooSoon => "too_soon",
            PolicyReason::NonFinite => "non_finite",
        }
    }
}

/// Produced fresh on every evaluation; never persisted as mutable state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolicyDecision {
    pub accepted: bool,
    pub resulting_value: f32,
    pub reason: PolicyReason,
}

/// Refusal-only gate. Stateless: everything it needs arrives as arguments,
/// and it never touches the signal itself.
#[derive(Debug, Clone, Copy)]
pub struct ModulatoryPolicy {
    min: f32,
    max: f32,
    max_step_change: f32,
    min_interval_steps: u64,
}

impl ModulatoryPolicy {
    fn new(cfg: &ModulatorConfig) -> Self {
        Self {
            min: cfg.min,
            max: cfg.max,
            max_step_change: cfg.max_step_change,
            min_interval_steps: cfg.min_interval_steps,
        }
    }

    /// Evaluate one proposal. The returned value is what the signal would
    /// become; it never moves farther than `max_step_change` from
    /// `current` and never leaves `[min, max]`.
    pub fn evaluate(
        &self,
        current: f32,
        delta: f32,
        step: u64,
        last_accepted: Option<u64>,
        enabled: bool,
    ) -> PolicyDecision {
        if !enabled {
            return PolicyDecision {
                accepted: false,
                resulting_value: current,
                reason: PolicyReason::Disabled,
            };
        }
        if !delta.is_finite() {
            // A single bad proposal must never corrupt the bounded signal.
            return PolicyDecision {
                accepted: false,
                resulting_value: current,
                reason: PolicyReason::NonFinite,
            };
        }
        if let Some(last) = last_accepted {
            if step < last.saturating_add(self.min_interval_steps) {
                return PolicyDecision {
                    accepted: false,
                    resulting_value: current,
                    reason: PolicyReason::TooSoon,
                };
            }
        }

        let trimmed = delta.clamp(-self.max_step_change, self.max_step_change);
        let resulting = (current + trimmed).clamp(self.min, self.max);
        let reason = if trimmed == delta && resulting == current + delta {
            PolicyReason::Applied
        } else {
            PolicyReason::Trimmed
        };
        PolicyDecision {
            accepted: true,
            resulting_value: resulting,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraceEntry {
    pub step: u64,
    pub proposed_delta: f32,
    pub decision: PolicyDecision,
}

/// Append-only record of every evaluated proposal, accepted or not.
#[derive(Debug, Clone, Default)]
pub struct ModulatoryTrace {
    entries: Vec<TraceEntry>,
}

impl ModulatoryTrace {
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn append(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModulatorSnapshot {
    pub kind: String,
    pub enabled: bool,
    pub value: f32,
    pub proposals: usize,
    pub last_accepted_step: Option<u64>,
}

/// One governed pressure source: signal + policy + trace.
#[derive(Debug, Clone)]
pub struct Modulator {
    kind: ModulatorKind,
    signal: ModulatorySignal,
    policy: ModulatoryPolicy,
    trace: ModulatoryTrace,
    weight: f32,
    last_accepted: Option<u64>,
}

impl Modulator {
    pub fn new(kind: ModulatorKind, cfg: ModulatorConfig) -> Self {
        let cfg = cfg.sanitized();
        Self {
            kind,
            signal: ModulatorySignal::new(&cfg),
            policy: ModulatoryPolicy::new(&cfg),
            trace: ModulatoryTrace::default(),
            weight: cfg.weight,
            last_accepted: None,
        }
    }

    pub fn kind(&self) -> ModulatorKind {
        self.kind
    }

    pub fn value(&self) -> f32 {
        self.signal.value()
    }

    pub fn is_enabled(&self) -> bool {
        self.signal.is_enabled()
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn trace(&self) -> &ModulatoryTrace {
        &self.trace
    }

    /// Propose a change. The signal moves only if the policy accepts, and
    /// only by what the policy returns; every proposal is traced.
    pub fn propose(&mut self, delta: f32, step: u64) -> PolicyDecision {
        let decision = self.policy.evaluate(
            self.signal.value(),
            delta,
            step,
            self.last_accepted,
            self.signal.is_enabled(),
        );
        if decision.accepted {
            self.signal.value = decision.resulting_value;
            self.last_accepted = Some(step);
        }
        self.trace.append(TraceEntry {
            step,
            proposed_delta: delta,
            decision,
        });
        decision
    }

    /// Per-tick relaxation toward rest.
    pub fn advance(&mut self, dt: f32) {
        self.signal.advance(dt);
    }

    pub fn snapshot(&self) -> ModulatorSnapshot {
        ModulatorSnapshot {
            kind: self.kind.as_str().to_string(),
            enabled: self.signal.is_enabled(),
            value: self.signal.value(),
            proposals: self.trace.len(),
            last_accepted_step: self.last_accepted,
        }
    }

    /// Episode boundary: signal back to rest. The trace is kept — it is
    /// append-only for the lifetime of the instance.
    pub fn reset(&mut self) {
        self.signal.value = self.signal.rest;
        self.last_accepted = None;
    }
}

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type AssemblyId = usize;

/// Label of the competitor group an assembly belongs to.
///
/// Carried directly on the assembly record so the kernel never has to
/// guess group membership from anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelId(String);

impl ChannelId {
    /// Empty labels collapse onto the default channel.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        if label.is_empty() {
            Self::default_channel()
        } else {
            Self(label)
        }
    }

    pub fn default_channel() -> Self {
        Self("default".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-unit dynamical parameters.
///
/// Every field is run through `sanitized()` at construction: non-finite
/// values fall back to the default, ranges are normalized so the update
/// rule never has to defend itself mid-run.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssemblyParams {
    /// Resting drive with no input.
    pub baseline: f32,
    /// Slow baseline tracker: `tonic += tonic_gain * (tonic_target - activity)`.
    pub tonic_gain: f32,
    pub tonic_target: f32,
    /// Orientation of external drive; normalized to -1.0 or 1.0.
    pub drive_sign: f32,
    /// Pull-to-baseline rate.
    pub homeostasis: f32,
    /// Suppression proportional to current activity.
    pub self_inhibition: f32,
    /// Integration time constant. Near-zero snaps to the drive directly.
    pub tau: f32,
    /// Static multiplier on `tau` (per-unit time-constant bias).
    pub tau_bias: f32,
    /// Bounded noise amplitude added to the drive.
    pub noise_amp: f32,
    /// Output fires only above this activity level.
    pub threshold: f32,
    /// Output gain above threshold.
    pub gain: f32,
    /// Optional saturation: `x / (1 + norm_damping * x)`. Zero disables it.
    pub norm_damping: f32,
    /// Static multiplier on incoming lateral inhibition.
    pub inhibition_bias: f32,
    pub max_rate: f32,
    pub clamp_min: f32,
    pub clamp_max: f32,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            baseline: 0.0,
            tonic_gain: 0.0,
            tonic_target: 0.0,
            drive_sign: 1.0,
            homeostasis: 0.02,
            self_inhibition: 0.05,
            tau: 0.5,
            tau_bias: 1.0,
            noise_amp: 0.0,
            threshold: 0.0,
            gain: 1.0,
            norm_damping: 0.0,
            inhibition_bias: 1.0,
            max_rate: 10.0,
            clamp_min: -2.0,
            clamp_max: 2.0,
        }
    }
}

impl AssemblyParams {
    /// Replace non-finite fields with defaults and normalize ranges.
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let fin = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };

        let clamp_min = fin(self.clamp_min, d.clamp_min);
        let clamp_max = fin(self.clamp_max, d.clamp_max).max(clamp_min);

        Self {
            baseline: fin(self.baseline, d.baseline),
            tonic_gain: fin(self.tonic_gain, d.tonic_gain).max(0.0),
            tonic_target: fin(self.tonic_target, d.tonic_target),
            drive_sign: if fin(self.drive_sign, 1.0) < 0.0 { -1.0 } else { 1.0 },
            homeostasis: fin(self.homeostasis, d.homeostasis).max(0.0),
            self_inhibition: fin(self.self_inhibition, d.self_inhibition).max(0.0),
            tau: fin(self.tau, d.tau).max(0.0),
            tau_bias: fin(self.tau_bias, d.tau_bias).max(0.0),
            noise_amp: fin(self.noise_amp, d.noise_amp).max(0.0),
            threshold: fin(self.threshold, d.threshold),
            gain: fin(self.gain, d.gain).max(0.0),
            norm_damping: fin(self.norm_damping, d.norm_damping).max(0.0),
            inhibition_bias: fin(self.inhibition_bias, d.inhibition_bias).max(0.0),
            max_rate: fin(self.max_rate, d.max_rate).max(0.0),
            clamp_min,
            clamp_max,
        }
    }
}

/// A single population unit: scalar activity plus a rectified readout.
///
/// Created once at configuration time, mutated every tick by `advance`
/// only, never deleted during a run.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub id: AssemblyId,
    pub channel: ChannelId,
    params: AssemblyParams,

    activity: f32,
    output: f32,
    tonic: f32,

    // One-tick accumulators. Cleared at the end of every advance;
    // callers re-inject each tick, nothing persists implicitly.
    input: f32,
    lateral_inhibition: f32,
    transient_gain: f32,
}

/// Below this, integration snaps to the drive instead of relaxing.
const TAU_SNAP: f32 = 1e-6;

impl Assembly {
    pub fn new(id: AssemblyId, channel: ChannelId, params: AssemblyParams) -> Self {
        Self {
            id,
            channel,
            params: params.sanitized(),
            activity: 0.0,
            output: 0.0,
            tonic: 0.0,
            input: 0.0,
            lateral_inhibition: 0.0,
            transient_gain: 1.0,
        }
    }

    pub fn params(&self) -> &AssemblyParams {
        &self.params
    }

    pub fn activity(&self) -> f32 {
        self.activity
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    /// Add external drive for the upcoming tick only.
    pub fn add_input(&mut self, magnitude: f32) {
        self.input += magnitude;
    }

    /// Add competitive suppression for the upcoming tick only.
    pub fn add_lateral_inhibition(&mut self, magnitude: f32) {
        self.lateral_inhibition += magnitude * self.params.inhibition_bias;
    }

    /// One-tick multiplicative gain on external drive (reset to 1 by `advance`).
    pub fn set_transient_gain(&mut self, gain: f32) {
        self.transient_gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
    }

    /// Suppression queued for the next `advance` (bias already applied).
    pub(crate) fn pending_lateral_inhibition(&self) -> f32 {
        self.lateral_inhibition
    }

    /// One integration step.
    ///
    /// `noise` is pre-sampled by the tick loop so the update itself stays
    /// free of generator state (and can fan out across threads).
    pub fn advance(&mut self, dt: f32, noise: f32) {
        let p = &self.params;

        self.tonic += p.tonic_gain * (p.tonic_target - self.activity);

        let external = p.drive_sign * self.transient_gain * (self.input - self.lateral_inhibition);
        let drive = p.baseline
            + self.tonic
            + external
            + p.homeostasis * (p.baseline - self.activity)
            - p.self_inhibition * self.activity
            + noise;

        let tau_eff = p.tau * p.tau_bias;
        if tau_eff <= TAU_SNAP {
            self.activity = drive;
        } else {
            let alpha = (dt / tau_eff).min(1.0);
            self.activity += alpha * (drive - self.activity);
        }
        self.activity = self.activity.clamp(p.clamp_min, p.clamp_max);

        // Rectified readout: zero at or below threshold, monotone above it.
        let x = self.activity - p.threshold;
        self.output = if x > 0.0 {
            let shaped = if p.norm_damping > 0.0 {
                x / (1.0 + p.norm_damping * x)
            } else {
                x
            };
            (p.gain * shaped).clamp(0.0, p.max_rate)
        } else {
            0.0
        };

        // Clear one-tick state.
        self.input = 0.0;
        self.lateral_inhibition = 0.0;
        self.transient_gain = 1.0;
    }

    /// Drop all dynamical state back to rest. Configuration is untouched.
    pub fn reset(&mut self) {
        self.activity = 0.0;
        self.output = 0.0;
        self.tonic = 0.0;
        self.input = 0.0;
        self.lateral_inhibition = 0.0;
        self.transient_gain = 1.0;
    }
}

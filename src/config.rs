use thiserror::Error;

use crate::assembly::{AssemblyParams, ChannelId};
use crate::competition::KernelConfig;
use crate::latch::LatchConfig;
use crate::modulation::ModulatorConfig;

/// Fatal construction-time problems. Nothing here is recovered mid-run:
/// a bad definition set never produces a half-built arbiter.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no channels defined")]
    NoChannels,
    #[error("channel `{0}` has no assemblies")]
    EmptyChannel(String),
    #[error("duplicate channel `{0}`")]
    DuplicateChannel(String),
    #[error("tick size must be finite and positive, got {0}")]
    InvalidDt(f32),
}

/// One competitor group and its member definitions.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub assemblies: Vec<AssemblyParams>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assemblies: Vec::new(),
        }
    }

    /// `count` identical members.
    pub fn uniform(name: impl Into<String>, count: usize, params: AssemblyParams) -> Self {
        Self {
            name: name.into(),
            assemblies: vec![params; count],
        }
    }

    pub fn with_assembly(mut self, params: AssemblyParams) -> Self {
        self.assemblies.push(params);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Simulation tick size.
    pub dt: f32,
    /// Per-injection stimulus magnitude cap.
    pub stimulus_limit: f32,
    /// Reproducible runs when set.
    pub seed: Option<u64>,
    pub channels: Vec<ChannelSpec>,
    pub kernel: KernelConfig,
    pub latch: LatchConfig,
    pub value: ModulatorConfig,
    pub urgency: ModulatorConfig,
    pub salience: ModulatorConfig,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            dt: 0.1,
            stimulus_limit: 1.0,
            seed: None,
            channels: Vec::new(),
            kernel: KernelConfig::default(),
            latch: LatchConfig::default(),
            // Value scales drive vigor; cancelled by normalization.
            value: ModulatorConfig {
                weight: 0.5,
                ..ModulatorConfig::default()
            },
            // Urgency leans on the relief gate. The cap (weight * max)
            // must stay below the relief threshold so urgency alone can
            // never open the gate.
            urgency: ModulatorConfig {
                weight: 0.3,
                ..ModulatorConfig::default()
            },
            // Salience scales incoming stimulus uniformly.
            salience: ModulatorConfig {
                weight: 0.5,
                ..ModulatorConfig::default()
            },
        }
    }
}

impl ArbiterConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_dt(mut self, dt: f32) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChannelSpec>) -> Self {
        self.channels = channels;
        self
    }

    /// Structural validation. Numeric oddities are sanitized by the
    /// individual components instead; only malformed definitions fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(ConfigError::InvalidDt(self.dt));
        }
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }

        let mut seen: Vec<ChannelId> = Vec::with_capacity(self.channels.len());
        for spec in &self.channels {
            if spec.assemblies.is_empty() {
                return Err(ConfigError::EmptyChannel(spec.name.clone()));
            }
            // Empty labels collapse onto the default channel first, so two
            // unlabeled specs collide here rather than merging silently.
            let id = ChannelId::new(spec.name.as_str());
            if seen.contains(&id) {
                return Err(ConfigError::DuplicateChannel(id.as_str().to_string()));
            }
            seen.push(id);
        }
        Ok(())
    }
}

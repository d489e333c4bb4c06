use hashbrown::HashMap;
use tracing::{debug, info};

use crate::assembly::{Assembly, ChannelId};
use crate::competition::CompetitionKernel;
use crate::config::{ArbiterConfig, ConfigError};
use crate::latch::{DecisionLatch, DecisionState, LatchInputs, LatchPhase};
use crate::modulation::{Modulator, ModulatorKind, PolicyDecision};
use crate::prng::Prng;
use crate::trace::{TraceEvent, TraceLog};

#[derive(Debug, Clone, Copy)]
struct ForcedCoincidence {
    remaining: u32,
    contrast_boost: f32,
    relief_boost: f32,
}

/// The arbitration engine: assemblies, competition kernel, modulatory
/// governance instances and the decision latch, driven by a single
/// synchronous tick loop.
///
/// One logical thread owns the whole thing. Each tick runs
/// stimulus -> assembly update -> competition -> modulation -> latch with
/// no suspension points; the latch always observes the same tick's
/// dominance and relief.
pub struct Arbiter {
    dt: f32,
    stimulus_limit: f32,

    assemblies: Vec<Assembly>,
    kernel: CompetitionKernel,
    latch: DecisionLatch,
    // Uniform iteration: disabled instances still advance and refuse,
    // there is no ad-hoc flag checking in the tick path.
    modulators: Vec<Modulator>,

    rng: Prng,
    trace: TraceLog,

    pending_bias: HashMap<ChannelId, f32>,
    noise_scratch: Vec<f32>,
    gain_scratch: Vec<f32>,
    forced: Option<ForcedCoincidence>,

    step: u64,
    time: f64,
    last_contrast: f32,
    last_relief: f32,
}

const VALUE: usize = 0;
const URGENCY: usize = 1;
const SALIENCE: usize = 2;

impl Arbiter {
    pub fn new(cfg: ArbiterConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;

        let mut assemblies = Vec::new();
        for spec in &cfg.channels {
            let channel = ChannelId::new(spec.name.as_str());
            for params in &spec.assemblies {
                let id = assemblies.len();
                assemblies.push(Assembly::new(id, channel.clone(), *params));
            }
        }

        let kernel = CompetitionKernel::new(cfg.kernel, &assemblies);
        let latch = DecisionLatch::new(cfg.latch);
        let modulators = vec![
            Modulator::new(ModulatorKind::Value, cfg.value),
            Modulator::new(ModulatorKind::Urgency, cfg.urgency),
            Modulator::new(ModulatorKind::Salience, cfg.salience),
        ];

        let stimulus_limit = if cfg.stimulus_limit.is_finite() {
            cfg.stimulus_limit.max(0.0)
        } else {
            1.0
        };

        Ok(Self {
            dt: cfg.dt,
            stimulus_limit,
            assemblies,
            kernel,
            latch,
            modulators,
            rng: Prng::new(cfg.seed.unwrap_or(1)),
            trace: TraceLog::disabled(),
            pending_bias: HashMap::new(),
            noise_scratch: Vec::new(),
            gain_scratch: Vec::new(),
            forced: None,
            step: 0,
            time: 0.0,
            last_contrast: 0.0,
            last_relief: 0.0,
        })
    }

    /// Hand the engine an owned event log (replaces the previous one).
    pub fn install_trace(&mut self, log: TraceLog) {
        self.trace = log;
    }

    pub fn trace_log(&self) -> &TraceLog {
        &self.trace
    }

    /// Add stimulus to one member (or spread it over the whole channel)
    /// for exactly the next tick. Magnitude is clamped to the configured
    /// limit; non-finite magnitudes are refused. Returns false when the
    /// channel or member does not exist.
    pub fn inject_stimulus(&mut self, channel: &str, member: Option<usize>, magnitude: f32) -> bool {
        if !magnitude.is_finite() {
            return false;
        }
        let magnitude = magnitude.clamp(-self.stimulus_limit, self.stimulus_limit);

        let id = ChannelId::new(channel);
        let Some(members) = self.kernel.members_of(&id) else {
            return false;
        };

        match member {
            Some(i) => {
                let Some(&slot) = members.get(i) else {
                    return false;
                };
                self.assemblies[slot].add_input(magnitude);
            }
            None => {
                let share = magnitude / members.len() as f32;
                for &slot in members {
                    self.assemblies[slot].add_input(share);
                }
            }
        }
        true
    }

    /// Queue a bounded per-channel bias for the next competition pass.
    pub fn inject_channel_bias(&mut self, channel: &str, magnitude: f32) -> bool {
        if !magnitude.is_finite() {
            return false;
        }
        let magnitude = magnitude.clamp(-self.stimulus_limit, self.stimulus_limit);
        let id = ChannelId::new(channel);
        if self.kernel.members_of(&id).is_none() {
            return false;
        }
        *self.pending_bias.entry(id).or_insert(0.0) += magnitude;
        true
    }

    /// Route a proposal through the named modulator's policy gate.
    pub fn propose_modulation(&mut self, kind: ModulatorKind, delta: f32) -> PolicyDecision {
        let step = self.step;
        let decision = self.modulators[Self::slot(kind)].propose(delta, step);
        if !decision.accepted {
            debug!(
                signal = kind.as_str(),
                reason = decision.reason.as_str(),
                "modulation proposal refused"
            );
            self.trace.push(TraceEvent::ModulationRejected {
                step,
                signal: kind.as_str(),
                reason: decision.reason.as_str(),
            });
        }
        decision
    }

    pub fn modulator(&self, kind: ModulatorKind) -> &Modulator {
        &self.modulators[Self::slot(kind)]
    }

    pub fn modulators(&self) -> &[Modulator] {
        &self.modulators
    }

    fn slot(kind: ModulatorKind) -> usize {
        match kind {
            ModulatorKind::Value => VALUE,
            ModulatorKind::Urgency => URGENCY,
            ModulatorKind::Salience => SALIENCE,
        }
    }

    /// Debug/test hook: boost the latch's observed contrast and relief for
    /// a bounded number of ticks, exercising the commit edge without a
    /// real asymmetry. Boosts are clamped to [0, 1].
    pub fn force_coincidence(&mut self, ticks: u32, contrast_boost: f32, relief_boost: f32) {
        if ticks == 0 {
            self.forced = None;
            return;
        }
        let clamp01 = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        self.forced = Some(ForcedCoincidence {
            remaining: ticks,
            contrast_boost: clamp01(contrast_boost),
            relief_boost: clamp01(relief_boost),
        });
    }

    /// One synchronous simulation step.
    pub fn tick(&mut self) {
        self.step += 1;
        self.time += self.dt as f64;
        let dt = self.dt;

        // Salience: uniform transient stimulus gain for this tick.
        let sal = &self.modulators[SALIENCE];
        let sal_gain = if sal.is_enabled() {
            (1.0 + sal.weight() * sal.value()).clamp(0.0, 2.0)
        } else {
            1.0
        };

        // Noise is pre-sampled sequentially so runs stay reproducible
        // regardless of how the update itself is executed.
        self.noise_scratch.clear();
        for a in &self.assemblies {
            let amp = a.params().noise_amp;
            self.noise_scratch.push(self.rng.noise(amp));
        }

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            let noise = &self.noise_scratch;
            self.assemblies
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, a)| {
                    a.set_transient_gain(sal_gain);
                    a.advance(dt, noise[i]);
                });
        }
        #[cfg(not(feature = "parallel"))]
        for (a, &noise) in self.assemblies.iter_mut().zip(&self.noise_scratch) {
            a.set_transient_gain(sal_gain);
            a.advance(dt, noise);
        }

        // Value: uniform vigor gain. Normalization cancels it, so it can
        // color raw output levels but never pick a winner.
        let value = &self.modulators[VALUE];
        let external_gain = if value.is_enabled() {
            let g = (1.0 + value.weight() * value.value()).clamp(0.25, 4.0);
            self.gain_scratch.clear();
            self.gain_scratch.resize(self.assemblies.len(), g);
            Some(self.gain_scratch.as_slice())
        } else {
            None
        };

        let external_bias = if self.pending_bias.is_empty() {
            None
        } else {
            Some(&self.pending_bias)
        };

        self.kernel.apply(
            &mut self.assemblies,
            dt,
            self.step,
            external_gain,
            external_bias,
            &mut self.trace,
        );
        self.pending_bias.clear();

        for m in &mut self.modulators {
            m.advance(dt);
        }

        let mut contrast = self.kernel.contrast();
        let mut relief = self.kernel.relief();

        // Urgency: bounded pressure on the relief gate. The coupling cap
        // sits below the relief threshold, so urgency needs a real
        // competitive collapse to matter.
        let urgency = &self.modulators[URGENCY];
        if urgency.is_enabled() {
            relief += urgency.weight() * urgency.value();
        }

        if let Some(forced) = &mut self.forced {
            contrast += forced.contrast_boost;
            relief += forced.relief_boost;
            forced.remaining -= 1;
            if forced.remaining == 0 {
                self.forced = None;
            }
        }

        let contrast = contrast.clamp(0.0, 1.0);
        let relief = relief.clamp(0.0, 1.0);
        self.last_contrast = contrast;
        self.last_relief = relief;

        // The latch sees this tick's dominance and relief, never stale ones.
        let committed = match self.kernel.winner() {
            Some(winner) => self.latch.evaluate(LatchInputs {
                winner,
                contrast,
                relief,
                step: self.step,
                time: self.time,
            }),
            None => false,
        };

        if committed {
            if let Some(d) = self.latch.decision() {
                info!(
                    winner = %d.winner_channel,
                    step = d.step,
                    contrast = d.dominance_contrast,
                    relief = d.relief_at_commit,
                    "decision committed"
                );
                self.trace.push(TraceEvent::Commit {
                    step: d.step,
                    winner: d.winner_channel.clone(),
                    contrast: d.dominance_contrast,
                    relief: d.relief_at_commit,
                });
            }
        }
    }

    /// Episode boundary: dynamical state, dominance history, modulatory
    /// signals and the latch all return to rest. Step/time keep counting;
    /// configuration and the modulatory traces are untouched.
    pub fn reset_episode(&mut self) {
        for a in &mut self.assemblies {
            a.reset();
        }
        self.kernel.reset();
        self.latch.reset_for_episode();
        for m in &mut self.modulators {
            m.reset();
        }
        self.pending_bias.clear();
        self.forced = None;
        self.last_contrast = 0.0;
        self.last_relief = 0.0;
        self.trace.push(TraceEvent::EpisodeReset { step: self.step });
        debug!(step = self.step, "episode reset");
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn phase(&self) -> LatchPhase {
        self.latch.phase()
    }

    /// `None` until a decision has been committed.
    pub fn decision(&self) -> Option<&DecisionState> {
        self.latch.decision()
    }

    pub fn winner(&self) -> Option<&ChannelId> {
        self.kernel.winner()
    }

    /// Contrast as observed by the latch on the last tick.
    pub fn contrast(&self) -> f32 {
        self.last_contrast
    }

    /// Relief as observed by the latch on the last tick (modulatory bias
    /// and any forced boost included).
    pub fn relief(&self) -> f32 {
        self.last_relief
    }

    pub fn kernel(&self) -> &CompetitionKernel {
        &self.kernel
    }

    pub fn assembly_count(&self) -> usize {
        self.assemblies.len()
    }

    pub fn total_output(&self) -> f32 {
        self.assemblies.iter().map(|a| a.output()).sum()
    }

    pub fn assemblies(&self) -> &[Assembly] {
        &self.assemblies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::AssemblyParams;
    use crate::config::ChannelSpec;

    fn quiet_params(noise_amp: f32) -> AssemblyParams {
        AssemblyParams {
            noise_amp,
            ..AssemblyParams::default()
        }
    }

    fn race_config(noise_amp: f32, seed: u64) -> ArbiterConfig {
        ArbiterConfig::default().with_seed(seed).with_channels(vec![
            ChannelSpec::uniform("H1", 1, quiet_params(noise_amp)),
            ChannelSpec::uniform("H2", 1, quiet_params(noise_amp)),
        ])
    }

    fn race_tick(arb: &mut Arbiter, h1: f32, h2: f32) {
        arb.inject_stimulus("H1", None, h1);
        arb.inject_stimulus("H2", None, h2);
        arb.tick();
    }

    #[test]
    fn two_channel_race_commits_to_the_stronger_channel() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();

        let mut committed_at = None;
        for _ in 0..2000 {
            race_tick(&mut arb, 0.021, 0.020);
            if arb.decision().is_some() {
                committed_at = Some(arb.step());
                break;
            }
        }

        let step = committed_at.expect("sustained asymmetry must commit");
        let d = arb.decision().unwrap().clone();
        assert_eq!(d.winner_channel.as_str(), "H1");
        assert!(d.dominance_contrast >= 0.55, "contrast {}", d.dominance_contrast);
        assert!(d.relief_at_commit >= 0.40, "relief {}", d.relief_at_commit);
        assert!(
            (50..1800).contains(&step),
            "commit landed at unexpected step {}",
            step
        );
        assert_eq!(d.step, step);
    }

    #[test]
    fn commit_is_deterministic_across_runs() {
        let run = || {
            let mut arb = Arbiter::new(race_config(0.005, 42)).unwrap();
            for _ in 0..3000 {
                race_tick(&mut arb, 0.021, 0.020);
                if arb.decision().is_some() {
                    break;
                }
            }
            arb.decision().cloned()
        };

        let a = run().expect("first run commits");
        let b = run().expect("second run commits");
        assert_eq!(a.step, b.step);
        assert_eq!(a.winner_channel, b.winner_channel);
        assert_eq!(a.dominance_contrast.to_bits(), b.dominance_contrast.to_bits());
        assert_eq!(a.relief_at_commit.to_bits(), b.relief_at_commit.to_bits());
    }

    #[test]
    fn symmetric_race_never_commits() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();
        for _ in 0..1000 {
            race_tick(&mut arb, 0.020, 0.020);
        }
        assert!(arb.decision().is_none());
        assert!(arb.contrast() < 0.01, "contrast {}", arb.contrast());
    }

    fn solo_modulator_config(kind: ModulatorKind) -> ArbiterConfig {
        let mut cfg = race_config(0.0, 1);
        cfg.value.enabled = false;
        cfg.urgency.enabled = false;
        cfg.salience.enabled = false;
        match kind {
            ModulatorKind::Value => cfg.value.enabled = true,
            ModulatorKind::Urgency => cfg.urgency.enabled = true,
            ModulatorKind::Salience => cfg.salience.enabled = true,
        }
        cfg
    }

    #[test]
    fn no_single_modulator_can_produce_a_decision() {
        // Each signal alone, pushed as hard as the policy allows, with a
        // perfectly symmetric stimulus: never a commit.
        for kind in [
            ModulatorKind::Value,
            ModulatorKind::Urgency,
            ModulatorKind::Salience,
        ] {
            let mut arb = Arbiter::new(solo_modulator_config(kind)).unwrap();
            for _ in 0..1000 {
                arb.propose_modulation(kind, 1.0);
                race_tick(&mut arb, 0.020, 0.020);
            }
            assert!(
                arb.decision().is_none(),
                "{} alone produced a decision",
                kind.as_str()
            );
            assert_eq!(arb.phase(), LatchPhase::Idle, "{}", kind.as_str());
        }
    }

    #[test]
    fn forced_coincidence_commits_deterministically() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();
        // Sustain default is 25; boost for comfortably longer.
        arb.force_coincidence(40, 1.0, 1.0);
        for _ in 0..40 {
            arb.tick();
            if arb.decision().is_some() {
                break;
            }
        }
        let d = arb.decision().expect("forced coincidence must commit");
        // Exact tie: the first configured channel wins.
        assert_eq!(d.winner_channel.as_str(), "H1");
        assert_eq!(d.step, 25, "commit on the sustain_steps-th qualifying tick");
    }

    #[test]
    fn short_forced_coincidence_does_not_commit() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();
        arb.force_coincidence(10, 1.0, 1.0);
        for _ in 0..50 {
            arb.tick();
        }
        assert!(arb.decision().is_none());
        assert_eq!(arb.phase(), LatchPhase::Idle, "counter must fully reset");
    }

    #[test]
    fn episode_reset_permits_a_new_decision() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();
        arb.force_coincidence(30, 1.0, 1.0);
        for _ in 0..30 {
            arb.tick();
        }
        let first = arb.decision().unwrap().step;

        arb.reset_episode();
        assert!(arb.decision().is_none());

        arb.force_coincidence(30, 1.0, 1.0);
        for _ in 0..30 {
            arb.tick();
        }
        let second = arb.decision().unwrap().step;
        assert!(second > first);
    }

    #[test]
    fn stimulus_routing_and_bounds() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();

        assert!(!arb.inject_stimulus("ghost", None, 0.5));
        assert!(!arb.inject_stimulus("H1", Some(99), 0.5));
        assert!(!arb.inject_stimulus("H1", None, f32::NAN));
        assert!(arb.inject_stimulus("H1", Some(0), 0.5));

        // Way past the limit: clamped, so activity stays tame.
        assert!(arb.inject_stimulus("H1", None, 1e9));
        arb.tick();
        for a in arb.assemblies() {
            assert!(a.activity() <= a.params().clamp_max);
            assert!(a.output() <= a.params().max_rate);
        }
    }

    #[test]
    fn everything_stays_bounded_under_stress() {
        let mut cfg = ArbiterConfig::default().with_seed(9).with_channels(vec![
            ChannelSpec::uniform("a", 3, quiet_params(0.01)),
            ChannelSpec::uniform("b", 3, quiet_params(0.01)),
            ChannelSpec::uniform("c", 2, quiet_params(0.01)),
        ]);
        cfg.stimulus_limit = 2.0;
        let mut arb = Arbiter::new(cfg).unwrap();

        for t in 0u64..500 {
            let wobble = ((t % 13) as f32 - 6.0) * 0.3;
            arb.inject_stimulus("a", None, 0.8 + wobble);
            arb.inject_stimulus("b", Some((t % 3) as usize), 1.5);
            arb.inject_channel_bias("c", 0.4);
            arb.tick();

            for a in arb.assemblies() {
                assert!(a.activity() >= a.params().clamp_min);
                assert!(a.activity() <= a.params().clamp_max);
                assert!((0.0..=a.params().max_rate).contains(&a.output()));
            }
            let sum: f32 = arb.kernel().dominance_map().iter().map(|(_, d)| d).sum();
            assert!((sum - 1.0).abs() < 1e-3, "dominance sum {}", sum);
            assert!((0.0..=1.0).contains(&arb.relief()));
            assert!((0.0..=1.0).contains(&arb.contrast()));
        }
    }

    #[test]
    fn channel_bias_can_steer_but_is_bounded() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();
        for _ in 0..200 {
            // Symmetric stimulus, persistent bias toward H2.
            arb.inject_channel_bias("H2", 0.05);
            race_tick(&mut arb, 0.020, 0.020);
        }
        let h2 = ChannelId::new("H2");
        assert!(arb.kernel().dominance(&h2).unwrap() > 0.5);
        assert_eq!(arb.winner().unwrap(), &h2);
    }

    #[test]
    fn rejected_proposals_reach_the_trace_log() {
        let mut arb = Arbiter::new(race_config(0.0, 1)).unwrap();
        arb.install_trace(TraceLog::new(64));

        arb.propose_modulation(ModulatorKind::Urgency, 0.1);
        arb.propose_modulation(ModulatorKind::Urgency, 0.1); // too soon
        let rejected = arb
            .trace_log()
            .events()
            .iter()
            .any(|e| matches!(e, TraceEvent::ModulationRejected { signal: "urgency", .. }));
        assert!(rejected);
    }
}

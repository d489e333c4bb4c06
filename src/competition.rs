use hashbrown::HashMap;

use crate::assembly::{Assembly, ChannelId};
use crate::trace::{TraceEvent, TraceLog};

/// Competition shaping parameters. None of these are ever modified by the
/// kernel itself: there is no learning here.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Time constant of dominance smoothing (`alpha = min(dt/tau, 1)`).
    pub dominance_tau: f32,
    /// How strongly trailing channels are suppressed per unit of lead.
    pub inhibition_gain: f32,
    /// Resistance to suppression for channels already above the mean.
    pub persistence: f32,
    /// Floor on per-channel summed output; avoids zero-division.
    pub output_floor: f32,
    /// Winner tie-break margin: a later channel must beat the current
    /// winner by more than this to take over. Strictly non-creative — it
    /// orders exact ties and never enters the dominance values themselves
    /// (there it would seed the inhibition loop and invent a decision).
    pub tie_epsilon: f32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            dominance_tau: 12.5,
            inhibition_gain: 0.15,
            persistence: 0.05,
            output_floor: 1e-4,
            tie_epsilon: 1e-7,
        }
    }
}

impl KernelConfig {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        let fin = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        Self {
            dominance_tau: fin(self.dominance_tau, d.dominance_tau).max(1e-3),
            inhibition_gain: fin(self.inhibition_gain, d.inhibition_gain).max(0.0),
            persistence: fin(self.persistence, d.persistence).max(0.0),
            output_floor: fin(self.output_floor, d.output_floor).max(f32::MIN_POSITIVE),
            tie_epsilon: fin(self.tie_epsilon, d.tie_epsilon).max(0.0),
        }
    }
}

#[derive(Debug, Clone)]
struct Channel {
    id: ChannelId,
    members: Vec<usize>,
    raw: f32,
    instantaneous: f32,
    smoothed: f32,
    previous: f32,
}

/// Turns many assembly outputs into a smoothed per-channel dominance
/// signal plus a global relief proxy.
///
/// The kernel owns the dominance state exclusively; everything else reads
/// it through the accessors below.
#[derive(Debug, Clone)]
pub struct CompetitionKernel {
    cfg: KernelConfig,
    channels: Vec<Channel>,
    index: HashMap<ChannelId, usize>,
    relief: f32,
    inhibition_last: f32,
    initialized: bool,
}

impl CompetitionKernel {
    /// Group assemblies by channel in first-appearance order. The grouping
    /// is fixed for the kernel's lifetime, matching the assembly set.
    pub fn new(cfg: KernelConfig, assemblies: &[Assembly]) -> Self {
        let cfg = cfg.sanitized();
        let mut channels: Vec<Channel> = Vec::new();
        let mut index: HashMap<ChannelId, usize> = HashMap::new();

        for (i, a) in assemblies.iter().enumerate() {
            let slot = *index.entry(a.channel.clone()).or_insert_with(|| {
                channels.push(Channel {
                    id: a.channel.clone(),
                    members: Vec::new(),
                    raw: 0.0,
                    instantaneous: 0.0,
                    smoothed: 0.0,
                    previous: 0.0,
                });
                channels.len() - 1
            });
            channels[slot].members.push(i);
        }

        Self {
            cfg,
            channels,
            index,
            relief: 0.0,
            inhibition_last: 0.0,
            initialized: false,
        }
    }

    /// One competition pass. Returns the smoothed dominance of the
    /// winning channel.
    ///
    /// `external_gain` is an optional per-assembly multiplier (averaged
    /// per channel); `external_bias` an optional per-channel additive
    /// term. Both are read-only inputs supplied fresh each tick.
    pub fn apply(
        &mut self,
        assemblies: &mut [Assembly],
        dt: f32,
        step: u64,
        external_gain: Option<&[f32]>,
        external_bias: Option<&HashMap<ChannelId, f32>>,
        trace: &mut TraceLog,
    ) -> f32 {
        let floor = self.cfg.output_floor;
        let n = self.channels.len();

        // Raw per-channel scores: summed rectified outputs, floored,
        // gain-scaled, biased, floored again.
        for ch in self.channels.iter_mut() {
            let mut sum = 0.0;
            for &m in &ch.members {
                sum += assemblies[m].output();
            }
            let mut score = sum.max(floor);

            if let Some(gains) = external_gain {
                let mut g = 0.0;
                for &m in &ch.members {
                    g += gains.get(m).copied().unwrap_or(1.0);
                }
                let mean_gain = g / ch.members.len() as f32;
                if mean_gain.is_finite() && mean_gain > 0.0 {
                    score *= mean_gain;
                }
            }

            if let Some(bias) = external_bias {
                if let Some(&b) = bias.get(&ch.id) {
                    if b.is_finite() {
                        score += b;
                    }
                }
            }
            ch.raw = score.max(floor);
        }

        // Normalize: instantaneous dominance sums to 1 across channels.
        let total: f32 = self.channels.iter().map(|c| c.raw).sum();
        for ch in &mut self.channels {
            ch.instantaneous = (ch.raw / total).clamp(0.0, 1.0);
        }

        // First-order smoothing with temporal inertia.
        let alpha = (dt / self.cfg.dominance_tau).min(1.0);
        for ch in &mut self.channels {
            ch.previous = ch.smoothed;
            if self.initialized {
                ch.smoothed += alpha * (ch.instantaneous - ch.smoothed);
            } else {
                ch.smoothed = ch.instantaneous;
            }
            ch.smoothed = ch.smoothed.clamp(0.0, 1.0);
        }
        self.initialized = true;

        self.relief = relief_from(&self.channels);

        // Lateral inhibition: pressure from channels ahead, netted against
        // persistence for channels already above the mean.
        self.inhibition_last = 0.0;
        let mean = 1.0 / n as f32;
        for c in 0..n {
            let s_c = self.channels[c].smoothed;
            let mut pressure = 0.0;
            for d in 0..n {
                if d != c {
                    pressure += (self.channels[d].smoothed - s_c).max(0.0);
                }
            }
            let resist = self.cfg.persistence * (s_c - mean).max(0.0);
            let net = (self.cfg.inhibition_gain * pressure - resist).max(0.0);
            if net > 0.0 {
                self.inhibition_last += net;
                let share = net / self.channels[c].members.len() as f32;
                for &m in &self.channels[c].members {
                    assemblies[m].add_lateral_inhibition(share);
                }
                trace.push(TraceEvent::InhibitionApplied {
                    step,
                    channel: self.channels[c].id.clone(),
                    amount: net,
                });
            }
        }

        let winner = self.winner_slot();
        trace.push(TraceEvent::Tick {
            step,
            winner: self.channels[winner].id.clone(),
            dominance: self.channels[winner].smoothed,
            relief: self.relief,
        });

        self.channels[winner].smoothed
    }

    fn winner_slot(&self) -> usize {
        let mut best = 0;
        for (i, ch) in self.channels.iter().enumerate().skip(1) {
            // Exact (and near-exact) ties keep the earlier channel.
            if ch.smoothed > self.channels[best].smoothed + self.cfg.tie_epsilon {
                best = i;
            }
        }
        best
    }

    pub fn winner(&self) -> Option<&ChannelId> {
        if !self.initialized {
            return None;
        }
        Some(&self.channels[self.winner_slot()].id)
    }

    /// Top minus runner-up smoothed dominance. With a single channel the
    /// contrast is that channel's dominance.
    pub fn contrast(&self) -> f32 {
        if !self.initialized {
            return 0.0;
        }
        let mut top = 0.0f32;
        let mut runner_up = 0.0f32;
        for ch in &self.channels {
            if ch.smoothed > top {
                runner_up = top;
                top = ch.smoothed;
            } else if ch.smoothed > runner_up {
                runner_up = ch.smoothed;
            }
        }
        top - runner_up
    }

    /// Inhibitory-gate proxy: collapse of the dominance distribution.
    /// 0 when uniform, toward 1 as one channel takes over.
    pub fn relief(&self) -> f32 {
        self.relief
    }

    pub fn dominance(&self, channel: &ChannelId) -> Option<f32> {
        self.index.get(channel).map(|&i| self.channels[i].smoothed)
    }

    pub fn instantaneous(&self, channel: &ChannelId) -> Option<f32> {
        self.index
            .get(channel)
            .map(|&i| self.channels[i].instantaneous)
    }

    /// Previous tick's smoothed dominance.
    pub fn previous(&self, channel: &ChannelId) -> Option<f32> {
        self.index.get(channel).map(|&i| self.channels[i].previous)
    }

    pub fn dominance_map(&self) -> Vec<(ChannelId, f32)> {
        self.channels
            .iter()
            .map(|c| (c.id.clone(), c.smoothed))
            .collect()
    }

    pub fn instantaneous_map(&self) -> Vec<(ChannelId, f32)> {
        self.channels
            .iter()
            .map(|c| (c.id.clone(), c.instantaneous))
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Assembly indices grouped under a channel; `None` for unknown labels.
    pub fn members_of(&self, channel: &ChannelId) -> Option<&[usize]> {
        self.index
            .get(channel)
            .map(|&i| self.channels[i].members.as_slice())
    }

    /// Total net lateral inhibition distributed on the last `apply`.
    pub fn inhibition_last_tick(&self) -> f32 {
        self.inhibition_last
    }

    /// Forget smoothed history (episode boundary). Grouping is kept.
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.raw = 0.0;
            ch.instantaneous = 0.0;
            ch.smoothed = 0.0;
            ch.previous = 0.0;
        }
        self.relief = 0.0;
        self.inhibition_last = 0.0;
        self.initialized = false;
    }
}

fn relief_from(channels: &[Channel]) -> f32 {
    let n = channels.len();
    if n <= 1 {
        return 1.0;
    }
    let mut entropy = 0.0;
    for ch in channels {
        if ch.smoothed > 0.0 {
            entropy -= ch.smoothed * ch.smoothed.ln();
        }
    }
    let max_entropy = (n as f32).ln();
    (1.0 - entropy / max_entropy).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::AssemblyParams;

    fn snap_params() -> AssemblyParams {
        AssemblyParams {
            tau: 0.0,
            homeostasis: 0.0,
            self_inhibition: 0.0,
            ..AssemblyParams::default()
        }
    }

    fn make_assemblies(labels: &[&str]) -> Vec<Assembly> {
        labels
            .iter()
            .enumerate()
            .map(|(i, l)| Assembly::new(i, ChannelId::new(*l), snap_params()))
            .collect()
    }

    fn drive(assemblies: &mut [Assembly], inputs: &[f32]) {
        for (a, &x) in assemblies.iter_mut().zip(inputs) {
            a.add_input(x);
            a.advance(0.1, 0.0);
        }
    }

    #[test]
    fn dominance_sums_to_one_and_is_bounded() {
        let mut assemblies = make_assemblies(&["a", "b", "c"]);
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        for inputs in [[0.5, 0.2, 0.1], [0.0, 0.0, 0.0], [2.0, 2.0, 0.01]] {
            drive(&mut assemblies, &inputs);
            kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);

            let sum: f32 = kernel.dominance_map().iter().map(|(_, d)| d).sum();
            assert!((sum - 1.0).abs() < 1e-4, "dominance sum {}", sum);
            for (id, d) in kernel.dominance_map() {
                assert!((0.0..=1.0).contains(&d), "{} out of range: {}", id, d);
            }
            let inst_sum: f32 = kernel.instantaneous_map().iter().map(|(_, d)| d).sum();
            assert!((inst_sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn exact_tie_resolves_to_first_channel_every_time() {
        for _ in 0..5 {
            let mut assemblies = make_assemblies(&["left", "right"]);
            let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
            let mut trace = TraceLog::disabled();

            // Identical (zero) outputs on both channels.
            kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);
            assert_eq!(kernel.winner().unwrap().as_str(), "left");
        }
    }

    #[test]
    fn smoothing_has_inertia() {
        let mut assemblies = make_assemblies(&["a", "b"]);
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        // Symmetric first pass initializes smoothed dominance at 0.5/0.5.
        drive(&mut assemblies, &[0.3, 0.3]);
        kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);

        // A hard swing toward "a" must not be followed at full speed.
        drive(&mut assemblies, &[1.0, 0.0]);
        kernel.apply(&mut assemblies, 0.1, 1, None, None, &mut trace);

        let a = ChannelId::new("a");
        let inst = kernel.instantaneous(&a).unwrap();
        let smoothed = kernel.dominance(&a).unwrap();
        assert!(inst > 0.9);
        assert!(
            smoothed < 0.6,
            "smoothed dominance jumped too fast: {}",
            smoothed
        );
        assert!(smoothed > kernel.previous(&a).unwrap());
    }

    #[test]
    fn trailing_channel_receives_inhibition_leader_does_not() {
        let mut assemblies = make_assemblies(&["lead", "trail"]);
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        drive(&mut assemblies, &[1.0, 0.1]);
        kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);

        assert_eq!(assemblies[0].pending_lateral_inhibition(), 0.0);
        assert!(assemblies[1].pending_lateral_inhibition() > 0.0);
    }

    #[test]
    fn relief_is_low_when_uniform_high_when_collapsed() {
        let mut assemblies = make_assemblies(&["a", "b"]);
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        drive(&mut assemblies, &[0.4, 0.4]);
        kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);
        assert!(kernel.relief() < 0.05, "uniform relief {}", kernel.relief());

        // Collapse: only "a" fires, long enough for smoothing to follow.
        for step in 1..3000 {
            drive(&mut assemblies, &[1.0, 0.0]);
            kernel.apply(&mut assemblies, 0.1, step, None, None, &mut trace);
        }
        assert!(
            kernel.relief() > 0.5,
            "collapsed relief {}",
            kernel.relief()
        );
        assert!(kernel.contrast() > 0.8);
    }

    #[test]
    fn uniform_external_gain_cannot_move_dominance() {
        let mut plain = make_assemblies(&["a", "b"]);
        let mut gained = make_assemblies(&["a", "b"]);
        let mut k1 = CompetitionKernel::new(KernelConfig::default(), &plain);
        let mut k2 = CompetitionKernel::new(KernelConfig::default(), &gained);
        let mut trace = TraceLog::disabled();

        let gains = vec![3.0, 3.0];
        for step in 0..50 {
            drive(&mut plain, &[0.5, 0.3]);
            drive(&mut gained, &[0.5, 0.3]);
            k1.apply(&mut plain, 0.1, step, None, None, &mut trace);
            k2.apply(&mut gained, 0.1, step, Some(&gains), None, &mut trace);
        }

        let a = ChannelId::new("a");
        let d1 = k1.dominance(&a).unwrap();
        let d2 = k2.dominance(&a).unwrap();
        assert!(
            (d1 - d2).abs() < 1e-5,
            "uniform gain shifted dominance: {} vs {}",
            d1,
            d2
        );
    }

    #[test]
    fn per_channel_bias_shifts_dominance() {
        let mut assemblies = make_assemblies(&["a", "b"]);
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        let mut bias = HashMap::new();
        bias.insert(ChannelId::new("b"), 0.5);

        drive(&mut assemblies, &[0.3, 0.3]);
        kernel.apply(&mut assemblies, 0.1, 0, None, Some(&bias), &mut trace);

        let b = ChannelId::new("b");
        assert!(kernel.instantaneous(&b).unwrap() > 0.5);
        assert_eq!(kernel.winner().unwrap(), &b);
    }

    #[test]
    fn all_silent_channels_produce_finite_uniformish_dominance() {
        let mut assemblies = make_assemblies(&["a", "b", "c", "d"]);
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);
        for (_, d) in kernel.dominance_map() {
            assert!(d.is_finite());
            assert!((d - 0.25).abs() < 0.01);
        }
        assert!(kernel.relief() < 0.01);
    }

    #[test]
    fn unknown_channel_query_is_none() {
        let assemblies = make_assemblies(&["a"]);
        let kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        assert!(kernel.dominance(&ChannelId::new("ghost")).is_none());
        assert!(kernel.winner().is_none(), "no winner before first apply");
    }

    #[test]
    fn members_share_channel_inhibition_evenly() {
        // Two units on the trailing channel split the net suppression.
        let mut assemblies = vec![
            Assembly::new(0, ChannelId::new("lead"), snap_params()),
            Assembly::new(1, ChannelId::new("trail"), snap_params()),
            Assembly::new(2, ChannelId::new("trail"), snap_params()),
        ];
        let mut kernel = CompetitionKernel::new(KernelConfig::default(), &assemblies);
        let mut trace = TraceLog::disabled();

        drive(&mut assemblies, &[1.0, 0.05, 0.05]);
        kernel.apply(&mut assemblies, 0.1, 0, None, None, &mut trace);

        let i1 = assemblies[1].pending_lateral_inhibition();
        let i2 = assemblies[2].pending_lateral_inhibition();
        assert!(i1 > 0.0);
        assert!((i1 - i2).abs() < 1e-7);
    }
}

use crate::assembly::ChannelId;

#[cfg(feature = "serde")]
use serde::Serialize;

/// One recorded arbitration event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum TraceEvent {
    /// End-of-tick summary from the competition kernel.
    Tick {
        step: u64,
        winner: ChannelId,
        dominance: f32,
        relief: f32,
    },
    /// Net lateral inhibition deposited on a channel's members this tick.
    InhibitionApplied {
        step: u64,
        channel: ChannelId,
        amount: f32,
    },
    Commit {
        step: u64,
        winner: ChannelId,
        contrast: f32,
        relief: f32,
    },
    EpisodeReset {
        step: u64,
    },
    ModulationRejected {
        step: u64,
        signal: &'static str,
        reason: &'static str,
    },
}

/// Explicitly owned event log, passed into the kernel by the tick loop.
///
/// Bounded: once `capacity` is reached the oldest events are dropped.
/// Disabled by default so the hot loop pays nothing unless an observer
/// asks for history.
#[derive(Debug, Clone)]
pub struct TraceLog {
    enabled: bool,
    capacity: usize,
    events: Vec<TraceEvent>,
}

impl TraceLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: true,
            capacity: capacity.max(1),
            events: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            capacity: 1,
            events: Vec::new(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn push(&mut self, event: TraceEvent) {
        if !self.enabled {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.remove(0);
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_drops_oldest() {
        let mut log = TraceLog::new(2);
        for step in 0..4 {
            log.push(TraceEvent::EpisodeReset { step });
        }
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.events()[0],
            TraceEvent::EpisodeReset { step: 2 },
            "oldest events should be evicted first"
        );
    }

    #[test]
    fn disabled_log_records_nothing() {
        let mut log = TraceLog::disabled();
        log.push(TraceEvent::EpisodeReset { step: 0 });
        assert!(log.is_empty());
    }
}

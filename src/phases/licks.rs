//! Per-trial lick buffer

use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::trials::Side;

/// One detected lick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LickEvent {
    /// Phase the engine was in when the lick was polled
    pub phase: Phase,
    pub ts: f64,
    pub side: Side,
}

/// Licks of the running trial, in detection order. Cleared at INTRO.
#[derive(Debug, Clone, Default)]
pub struct LickBuffer {
    events: Vec<LickEvent>,
}

impl LickBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn push(&mut self, event: LickEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[LickEvent] {
        &self.events
    }

    pub fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &LickEvent> {
        self.events.iter().filter(move |e| e.phase == phase)
    }

    pub fn any_in(&self, phase: Phase) -> bool {
        self.in_phase(phase).next().is_some()
    }

    pub fn any_side_in(&self, phase: Phase, side: Side) -> bool {
        self.in_phase(phase).any(|e| e.side == side)
    }

    /// First lick whose phase is one of `phases`.
    pub fn first_in(&self, phases: &[Phase]) -> Option<&LickEvent> {
        self.events.iter().find(|e| phases.contains(&e.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lick(phase: Phase, side: Side, ts: f64) -> LickEvent {
        LickEvent { phase, ts, side }
    }

    #[test]
    fn test_queries() {
        let mut buf = LickBuffer::new();
        buf.push(lick(Phase::Intro, Side::Right, 0.1));
        buf.push(lick(Phase::Lick, Side::Left, 3.0));
        buf.push(lick(Phase::Reward, Side::Right, 4.0));

        assert!(buf.any_in(Phase::Lick));
        assert!(!buf.any_in(Phase::Stim));
        assert!(buf.any_side_in(Phase::Lick, Side::Left));
        assert!(!buf.any_side_in(Phase::Lick, Side::Right));
        assert_eq!(buf.first_in(&[Phase::Lick, Phase::Reward]).unwrap().side, Side::Left);
        assert_eq!(buf.first_in(&[Phase::Reward]).unwrap().ts, 4.0);

        buf.clear();
        assert!(buf.is_empty());
    }
}

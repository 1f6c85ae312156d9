// ===============================
// src/brain.rs
// ===============================
//
// Brain = the pluggable decision step of a tick. It looks at the snapshot
// and may set its decision once (StateSnapshot::set_decision is write-once).
//
// Available brains (BRAIN=...):
// - idle : never decides; the worker then has nothing to act on (default)
// - hold : always decides `stay`
//
use tracing::debug;

use crate::config::BrainMode;
use crate::state::{Decision, StateSnapshot};

pub trait Brain: Send + Sync {
    fn name(&self) -> &'static str;
    fn update_decision(&self, state: &mut StateSnapshot);
}

#[derive(Debug, Default)]
pub struct IdleBrain;

impl Brain for IdleBrain {
    fn name(&self) -> &'static str { "idle" }
    fn update_decision(&self, state: &mut StateSnapshot) {
        debug!(observations = state.observations.len(), "idle brain: no decision");
    }
}

#[derive(Debug, Default)]
pub struct HoldBrain;

impl Brain for HoldBrain {
    fn name(&self) -> &'static str { "hold" }
    fn update_decision(&self, state: &mut StateSnapshot) {
        state.set_decision(Decision::stay());
    }
}

pub fn from_mode(mode: &BrainMode) -> Box<dyn Brain> {
    match mode {
        BrainMode::Idle => Box::new(IdleBrain),
        BrainMode::Hold => Box::new(HoldBrain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DecisionKind;

    #[test]
    fn idle_leaves_decision_empty() {
        let mut st = StateSnapshot::new(None, vec![]);
        IdleBrain.update_decision(&mut st);
        assert!(st.decision().is_none());
    }

    #[test]
    fn hold_stays_and_respects_earlier_decision() {
        let mut st = StateSnapshot::new(None, vec![]);
        HoldBrain.update_decision(&mut st);
        assert_eq!(st.decision().unwrap().kind(), DecisionKind::Stay);

        let mut st = StateSnapshot::new(None, vec![]);
        st.set_decision(Decision::buy("AAPL", None, 1));
        HoldBrain.update_decision(&mut st);
        assert_eq!(st.decision().unwrap().kind(), DecisionKind::Buy);
    }

    #[test]
    fn from_mode_picks_brain() {
        assert_eq!(from_mode(&BrainMode::Idle).name(), "idle");
        assert_eq!(from_mode(&BrainMode::Hold).name(), "hold");
    }
}

#![forbid(unsafe_code)]

//! Case lifecycle state machine.
//!
//! `PreSetup → Setup → Running → Teardown → PostTeardown → Done`. Phases only
//! move forward, each on an explicit completion signal. A verdict reached
//! before teardown jumps straight to `Teardown`, so teardown and post-teardown
//! always run. The first verdict recorded is final.

use l2cap_core::Outcome;
use tracing::debug;

/// Case lifecycle phase.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum Phase {
    PreSetup,
    Setup,
    Running,
    Teardown,
    PostTeardown,
    Done,
}

impl Phase {
    fn next(self) -> Option<Phase> {
        match self {
            Phase::PreSetup => Some(Phase::Setup),
            Phase::Setup => Some(Phase::Running),
            Phase::Running => Some(Phase::Teardown),
            Phase::Teardown => Some(Phase::PostTeardown),
            Phase::PostTeardown => Some(Phase::Done),
            Phase::Done => None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PhaseError {
    #[error("the running phase ends with a verdict, not a plain completion")]
    VerdictRequired,
    #[error("no phase follows {0:?}")]
    Finished(Phase),
}

#[derive(Debug)]
pub struct PhaseMachine {
    phase: Phase,
    outcome: Option<Outcome>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self { phase: Phase::PreSetup, outcome: None }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// The active phase completed without a verdict.
    pub fn advance(&mut self) -> Result<Phase, PhaseError> {
        if self.phase == Phase::Running {
            return Err(PhaseError::VerdictRequired);
        }
        let next = self.phase.next().ok_or(PhaseError::Finished(self.phase))?;
        debug!(from = ?self.phase, to = ?next, "phase complete");
        self.phase = next;
        Ok(next)
    }

    /// Record a verdict. Before teardown this ends the case's active work and
    /// moves to `Teardown`; afterwards only the first verdict is kept.
    pub fn conclude(&mut self, outcome: Outcome) -> Phase {
        match &self.outcome {
            None => self.outcome = Some(outcome),
            Some(first) => debug!(kept = %first, ignored = %outcome, "verdict already recorded"),
        }
        if self.phase < Phase::Teardown {
            debug!(from = ?self.phase, "moving to teardown");
            self.phase = Phase::Teardown;
        }
        self.phase
    }

    /// Final verdict once `Done`. A case that never produced one failed.
    pub fn into_outcome(self) -> Outcome {
        self.outcome
            .unwrap_or_else(|| Outcome::Failed("case finished without a verdict".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_visits_every_phase() {
        let mut m = PhaseMachine::new();
        assert_eq!(m.advance(), Ok(Phase::Setup));
        assert_eq!(m.advance(), Ok(Phase::Running));
        assert_eq!(m.advance(), Err(PhaseError::VerdictRequired));
        assert_eq!(m.conclude(Outcome::Passed), Phase::Teardown);
        assert_eq!(m.advance(), Ok(Phase::PostTeardown));
        assert_eq!(m.advance(), Ok(Phase::Done));
        assert_eq!(m.advance(), Err(PhaseError::Finished(Phase::Done)));
        assert_eq!(m.into_outcome(), Outcome::Passed);
    }

    #[test]
    fn setup_failure_skips_running() {
        let mut m = PhaseMachine::new();
        m.advance().unwrap();
        assert_eq!(m.conclude(Outcome::Failed("power on".into())), Phase::Teardown);
        assert_eq!(m.advance(), Ok(Phase::PostTeardown));
    }

    #[test]
    fn first_verdict_wins() {
        let mut m = PhaseMachine::new();
        m.conclude(Outcome::Aborted("no ecred".into()));
        m.conclude(Outcome::Passed);
        assert_eq!(m.outcome(), Some(&Outcome::Aborted("no ecred".into())));
    }

    #[test]
    fn teardown_verdict_does_not_rewind() {
        let mut m = PhaseMachine::new();
        m.conclude(Outcome::Passed);
        m.advance().unwrap();
        assert_eq!(m.conclude(Outcome::Failed("late".into())), Phase::PostTeardown);
        assert!(m.into_outcome().is_passed());
    }

    #[test]
    fn missing_verdict_is_failure() {
        assert!(PhaseMachine::new().into_outcome().is_failed());
    }
}

#![forbid(unsafe_code)]

//! Serial runner over the case registry.

use l2cap_core::{Outcome, TesterConfig};
use std::time::{Duration, Instant};
use tracing::info;

use crate::lifecycle::{LifecycleController, TestCase};

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub results: Vec<CaseResult>,
}

impl Summary {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_failed()).count()
    }

    pub fn aborted(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_aborted()).count()
    }

    /// Aborted cases are not held against the system under test.
    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome_of(&self, name: &str) -> Option<&Outcome> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.outcome)
    }
}

pub struct Runner {
    controller: LifecycleController,
    cases: Vec<TestCase>,
}

impl Runner {
    pub fn new(controller: LifecycleController, cases: Vec<TestCase>) -> Self {
        Self { controller, cases }
    }

    /// Keep only the cases the configured prefix and substring select.
    pub fn filtered(mut self, config: &TesterConfig) -> Self {
        self.cases.retain(|case| config.selects(&case.name));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.cases.iter().map(|case| case.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Run every case, one at a time. A case is finished (context dropped)
    /// before the next one starts.
    pub async fn run(&self) -> Summary {
        let mut summary = Summary::default();
        for case in &self.cases {
            let started = Instant::now();
            let outcome = self.controller.run(case).await;
            summary.results.push(CaseResult {
                name: case.name.clone(),
                outcome,
                elapsed: started.elapsed(),
            });
        }
        info!(
            total = summary.results.len(),
            passed = summary.passed(),
            failed = summary.failed(),
            aborted = summary.aborted(),
            "run complete"
        );
        summary
    }
}

#![forbid(unsafe_code)]

//! Lifecycle controller: runs one case through its five phases.
//!
//! The phase functions of a [`TestCase`] are plain function pointers that
//! borrow the case's [`TestContext`] for the duration of their future. The
//! controller owns the context, feeds every phase result into a
//! [`PhaseMachine`] and keeps calling whichever phase the machine is in until
//! it reaches `Done`, so a failure anywhere before teardown still runs
//! teardown and post-teardown.

use futures::future::BoxFuture;
use l2cap_core::{CaseError, ConnectionParameters, Outcome, Transport};
use l2cap_stream::{Phase, PhaseMachine};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use crate::context::{Environment, TestContext};
use crate::setup;

/// One phase of a case.
pub type PhaseFn = for<'a> fn(&'a mut TestContext) -> BoxFuture<'a, Result<(), CaseError>>;

/// A registered case. Immutable once built.
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub transport: Transport,
    pub params: Arc<ConnectionParameters>,
    pub pre_setup: PhaseFn,
    pub setup: PhaseFn,
    pub body: PhaseFn,
    pub teardown: PhaseFn,
    pub post_teardown: PhaseFn,
}

impl TestCase {
    /// A case with the standard controller discovery, teardown and
    /// power-off around the given setup and body.
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        params: ConnectionParameters,
        setup: PhaseFn,
        body: PhaseFn,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            params: Arc::new(params),
            pre_setup: setup::pre_setup,
            setup,
            body,
            teardown: setup::teardown,
            post_teardown: setup::post_teardown,
        }
    }

    fn phase_fn(&self, phase: Phase) -> Option<PhaseFn> {
        match phase {
            Phase::PreSetup => Some(self.pre_setup),
            Phase::Setup => Some(self.setup),
            Phase::Running => Some(self.body),
            Phase::Teardown => Some(self.teardown),
            Phase::PostTeardown => Some(self.post_teardown),
            Phase::Done => None,
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

pub struct LifecycleController {
    env: Arc<dyn Environment>,
    case_timeout: Duration,
}

impl LifecycleController {
    pub fn new(env: Arc<dyn Environment>, case_timeout: Duration) -> Self {
        Self { env, case_timeout }
    }

    pub fn case_timeout(&self) -> Duration {
        self.case_timeout
    }

    /// Run `case` to completion. Never returns before the case reached `Done`.
    pub async fn run(&self, case: &TestCase) -> Outcome {
        let span = tracing::info_span!("case", case = %case.name);
        async move {
            let started = Instant::now();
            let outcome = self.drive(case).await;
            info!(outcome = %outcome, elapsed = ?started.elapsed(), "case finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, case: &TestCase) -> Outcome {
        let mut machine = PhaseMachine::new();

        // Nothing below may see a half-built context.
        if let Err(err) = case.params.validate() {
            warn!(%err, "rejected parameter block");
            machine.conclude(Outcome::Failed(err.to_string()));
            return finish_without_context(machine);
        }
        let collaborators = match self.env.bring_up(case.transport).await {
            Ok(c) => c,
            Err(err) => {
                warn!(%err, "environment unavailable");
                machine.conclude(err.into());
                return finish_without_context(machine);
            }
        };

        let mut ctx = TestContext::new(case, collaborators);
        while let Some(run) = case.phase_fn(machine.phase()) {
            let phase = machine.phase();
            debug!(?phase, "entering phase");
            let result = self.run_phase(phase, run, &mut ctx).await;
            self.record(&mut machine, phase, result);
        }
        drop(ctx);
        machine.into_outcome()
    }

    async fn run_phase(
        &self,
        phase: Phase,
        run: PhaseFn,
        ctx: &mut TestContext,
    ) -> Result<(), CaseError> {
        if !matches!(phase, Phase::Setup | Phase::Running) {
            return run(ctx).await;
        }
        match timeout(self.case_timeout, run(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(CaseError::failed(format!(
                "{phase:?} phase timed out after {:?}",
                self.case_timeout
            ))),
        }
    }

    fn record(&self, machine: &mut PhaseMachine, phase: Phase, result: Result<(), CaseError>) {
        match result {
            Ok(()) if phase == Phase::Running => {
                machine.conclude(Outcome::Passed);
            }
            Ok(()) => {
                if let Err(err) = machine.advance() {
                    warn!(%err, "phase machine refused to advance");
                }
            }
            Err(err) if phase >= Phase::Teardown => {
                warn!(?phase, %err, "cleanup phase failed");
                machine.conclude(err.into());
                if let Err(err) = machine.advance() {
                    warn!(%err, "phase machine refused to advance");
                }
            }
            Err(err) => {
                match &err {
                    CaseError::Aborted(_) => info!(?phase, %err, "case aborted"),
                    CaseError::Failed(_) => warn!(?phase, %err, "case failed"),
                }
                machine.conclude(err.into());
            }
        }
    }
}

fn finish_without_context(mut machine: PhaseMachine) -> Outcome {
    while machine.advance().is_ok() {}
    machine.into_outcome()
}

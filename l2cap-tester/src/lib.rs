#![forbid(unsafe_code)]

//! L2CAP conformance test engine.
//!
//! A [`TestCase`] names a parameter block and the functions of its five
//! phases. The [`LifecycleController`] builds one [`TestContext`] per case,
//! walks it through pre-setup, setup, the scenario body, teardown and
//! post-teardown, and turns whatever happened into an [`Outcome`]. The
//! [`Runner`] feeds it the [`registry`] one case at a time.

pub mod context;
pub mod lifecycle;
pub mod registry;
pub mod runner;
pub mod scenarios;
pub mod setup;
pub mod transfer;

pub use context::{Collaborators, Environment, Event, LinkState, TestContext};
pub use l2cap_core::Outcome;
pub use lifecycle::{LifecycleController, PhaseFn, TestCase};
pub use runner::{CaseResult, Runner, Summary};

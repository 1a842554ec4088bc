#![forbid(unsafe_code)]

//! Simulated environment for the L2CAP tester.
//!
//! [`SimulatedStack`] models a conformant local L2CAP stack, the emulated
//! remote host with its controller, and the management interface in one
//! in-memory world. [`SimulatedEnvironment`] hands a fresh world to every
//! case, so the whole registry runs without radio hardware:
//!
//! ```no_run
//! use l2cap_conformance::SimulatedEnvironment;
//! use l2cap_core::SimulatorConfig;
//! use l2cap_tester::{registry, LifecycleController, Runner};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let env = Arc::new(SimulatedEnvironment::new(SimulatorConfig::default()));
//! let controller = LifecycleController::new(env, Duration::from_secs(2));
//! let summary = Runner::new(controller, registry::all_cases()).run().await;
//! assert!(summary.success());
//! # }
//! ```

pub mod simulator;

pub use simulator::{SimulatedEnvironment, SimulatedStack, CENTRAL_ADDRESS, PEER_ADDRESS};

#![forbid(unsafe_code)]

//! Verification logic of the L2CAP tester. Nothing in this crate performs I/O
//! or suspends: every type is fed events by the scenario driving it and
//! answers with a verdict.

pub mod flow_controller;
pub mod scan;
pub mod state;
pub mod timestamp;
pub mod transfer;

pub use flow_controller::{frames_per_sdu, required_credits, CreditWindow, FlowControlError};
pub use scan::{
    CloseTracker, CloseVariant, ScanAction, ScanState, SequencerAction, TwoSocketSequencer,
};
pub use state::{Phase, PhaseError, PhaseMachine};
pub use timestamp::{TimestampError, TimestampKind, TimestampVerifier, TxTimestamp};
pub use transfer::{fragments, TransferError, TransferProgress, TransferVerifier};

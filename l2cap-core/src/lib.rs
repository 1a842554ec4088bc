#![forbid(unsafe_code)]

//! Core types shared by every crate of the L2CAP tester: the per-case parameter
//! block, the outcome taxonomy, controller command decoding and the runtime
//! configuration.

pub mod config;
pub mod error;
pub mod hci;
pub mod outcome;
pub mod params;
pub mod signal;

pub use config::{SimulatorConfig, TesterConfig};
pub use error::{TesterError, TesterResult};
pub use hci::{AdvParameters, BdAddr, HciCommand};
pub use nix::errno::Errno;
pub use outcome::{CaseError, Outcome};
pub use params::{
    AddressType, Advertising, ChannelMode, ConnectionParameters, CreditParameters, IoCapability,
    SecurityLevel, SocketKind, TimestampFlags, Transfer, Transport,
};

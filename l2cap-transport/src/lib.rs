#![forbid(unsafe_code)]

//! Adapters between the tester and the world it drives.
//!
//! The local socket API, the emulated peer and the management interface are
//! traits so the same scenarios run against any implementation of them.
//! [`WatchSet`] turns socket readiness into cancellable one-shot events and
//! [`ConnectionDriver`] holds the connect/accept/transfer mechanics shared by
//! every scenario.

pub mod control;
pub mod driver;
pub mod peer;
pub mod socket;
pub mod watch;

pub use control::{ControlPlane, ControllerInfo, MgmtError, PairingReply, PairingRequest, Setting};
pub use driver::{ConnectProgress, ConnectionDriver, ErrorExpectation};
pub use peer::{HookData, HookGuard, PeerEvent, PeerHost, PeerServer};
pub use socket::{
    ChannelOptions, OptionName, Readiness, Received, Shutdown, SockAddr, SocketId, SocketLayer,
    SocketOption, TsInfo,
};
pub use watch::{Fired, WatchId, WatchSet};

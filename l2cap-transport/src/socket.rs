#![forbid(unsafe_code)]

//! Handle based, non-blocking local channel endpoint API.

use async_trait::async_trait;
use bitflags::bitflags;
use l2cap_core::{
    AddressType, BdAddr, ChannelMode, Errno, SecurityLevel, SocketKind, TimestampFlags,
};
use l2cap_stream::TxTimestamp;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sk{}", self.0)
    }
}

/// `sockaddr_l2`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SockAddr {
    pub bdaddr: BdAddr,
    pub addr_type: AddressType,
    pub psm: u16,
    pub cid: u16,
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct Readiness: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const HANGUP = 1 << 2;
        const ERROR = 1 << 3;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketOption {
    Security(SecurityLevel),
    Mode(ChannelMode),
    DeferSetup(bool),
    SendTimeout(Duration),
    Timestamping(TimestampFlags),
    SendBuffer(usize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OptionName {
    ReceiveMtu,
    SendMtu,
    SendBuffer,
}

/// Legacy `L2CAP_OPTIONS` MTU pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ChannelOptions {
    pub imtu: u16,
    pub omtu: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

/// Result of a successful receive.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Received {
    pub len: usize,
    /// Software receive timestamp, when receive timestamping is on.
    pub timestamp: Option<Duration>,
}

/// Timestamping capabilities of the adapter (`ETHTOOL_GET_TS_INFO`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TsInfo {
    pub so_timestamping: TimestampFlags,
    pub phc_index: i32,
    pub tx_types: u32,
    pub rx_filters: u32,
}

#[async_trait]
pub trait SocketLayer: Send + Sync {
    fn open(&self, kind: SocketKind) -> Result<SocketId, Errno>;
    fn bind(&self, sk: SocketId, addr: SockAddr) -> Result<(), Errno>;
    fn set_option(&self, sk: SocketId, option: SocketOption) -> Result<(), Errno>;
    fn get_option(&self, sk: SocketId, name: OptionName) -> Result<u32, Errno>;
    fn channel_options(&self, sk: SocketId) -> Result<ChannelOptions, Errno>;
    /// Non-blocking; `EINPROGRESS` and `EAGAIN` mean the attempt is pending.
    fn connect(&self, sk: SocketId, addr: SockAddr) -> Result<(), Errno>;
    fn listen(&self, sk: SocketId, backlog: u32) -> Result<(), Errno>;
    fn accept(&self, sk: SocketId) -> Result<SocketId, Errno>;
    fn send(&self, sk: SocketId, data: &[u8]) -> Result<usize, Errno>;
    fn recv(&self, sk: SocketId, buf: &mut [u8]) -> Result<Received, Errno>;
    /// Next transmit timestamp report, `EAGAIN` when none is queued.
    fn recv_error_queue(&self, sk: SocketId) -> Result<TxTimestamp, Errno>;
    /// Latched completion error (`SO_ERROR`), cleared by reading it.
    fn take_error(&self, sk: SocketId) -> Result<Option<Errno>, Errno>;
    fn peer_name(&self, sk: SocketId) -> Result<SockAddr, Errno>;
    fn shutdown(&self, sk: SocketId, how: Shutdown) -> Result<(), Errno>;
    fn close(&self, sk: SocketId);
    /// Zero-timeout readiness check.
    fn poll(&self, sk: SocketId) -> Readiness;
    /// Resolves once any of `interest` holds, with the readiness observed.
    async fn readiness(&self, sk: SocketId, interest: Readiness) -> Readiness;
    fn ts_info(&self) -> Result<TsInfo, Errno>;
}

#![forbid(unsafe_code)]

//! The emulated remote host and the controller emulator around it.
//!
//! Everything the peer reports arrives through subscriptions: each call
//! returns an owned receiver or guard, and dropping it unregisters the
//! subscription.

use async_trait::async_trait;
use bytes::Bytes;
use l2cap_core::{AddressType, BdAddr, CreditParameters, Errno, HciCommand, IoCapability};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedReceiver;

/// L2CAP server registered on the peer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PeerServer {
    pub psm: u16,
    /// Pinned LE credit parameters; peer defaults otherwise.
    pub credits: Option<CreditParameters>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A link to the local controller came up.
    Connected { handle: u16 },
    /// A channel to one of the peer's servers is open. `peer_cid` is the
    /// peer's end, `local_cid` the local stack's.
    ChannelConnected { handle: u16, psm: u16, peer_cid: u16, local_cid: u16 },
    ChannelDisconnected { handle: u16, peer_cid: u16 },
    /// Response to a request the peer sent with [`PeerHost::l2cap_request`].
    SignalResponse { handle: u16, code: u8, payload: Bytes },
}

/// Data the local stack sent to a hooked peer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookData {
    pub handle: u16,
    pub cid: u16,
    pub data: Bytes,
}

/// Keeps a peer-side filter installed for as long as it lives.
#[derive(Debug)]
pub struct HookGuard {
    _alive: Arc<()>,
}

impl HookGuard {
    /// A guard plus the weak handle the installer polls.
    pub fn pair() -> (Self, Weak<()>) {
        let alive = Arc::new(());
        let weak = Arc::downgrade(&alive);
        (Self { _alive: alive }, weak)
    }
}

#[async_trait]
pub trait PeerHost: Send + Sync {
    fn address(&self) -> BdAddr;
    /// Address of the local controller as known to the emulator.
    fn central_address(&self) -> BdAddr;
    fn central_le_scan_enabled(&self) -> bool;

    async fn set_adv_enable(&self, enable: bool) -> Result<(), Errno>;
    async fn write_scan_enable(&self, mode: u8) -> Result<(), Errno>;
    async fn write_ssp_mode(&self, enable: bool) -> Result<(), Errno>;
    fn set_io_capability(&self, capability: IoCapability);
    fn set_pin_code(&self, pin: &[u8]);
    fn set_reject_user_confirm(&self, reject: bool);

    fn add_l2cap_server(&self, server: PeerServer);
    fn hci_connect(&self, addr: BdAddr, addr_type: AddressType);
    /// Send a signalling request; the response arrives as
    /// [`PeerEvent::SignalResponse`].
    fn l2cap_request(&self, handle: u16, code: u8, payload: Bytes) -> Result<(), Errno>;
    /// Raw data on a channel of an established link.
    fn send_cid(&self, handle: u16, cid: u16, data: &[u8]) -> Result<(), Errno>;

    fn subscribe(&self) -> UnboundedReceiver<PeerEvent>;
    /// Divert what the local stack sends to `cid`. With `handle` unset the
    /// hook applies to every link, including ones not up yet. A hook replaces
    /// the peer's own handling of that channel.
    fn add_cid_hook(&self, handle: Option<u16>, cid: u16) -> UnboundedReceiver<HookData>;
    /// Commands the local controller issues from now on.
    fn command_tap(&self) -> UnboundedReceiver<HciCommand>;
    /// Withhold the completion of `opcode` while the guard lives.
    fn suppress_completion(&self, opcode: u16) -> HookGuard;
}

//! The simulated world: both controllers, the links between them and the
//! local sockets.
//!
//! Outgoing connections move through the same stages a controller takes
//! them through. LE sockets put the peer on the accept list and scan (or,
//! with local advertising on, advertise directed at it); BR/EDR sockets
//! page. Once a link is up every socket waiting on it is secured, pairing
//! when its security level asks for more than the link has, and then
//! requested over the signalling channel.

use bytes::Bytes;
use l2cap_core::hci::{opcode, ADV_DIRECT_IND};
use l2cap_core::signal::CID_ATT;
use l2cap_core::{
    AddressType, BdAddr, CreditParameters, Errno, HciCommand, IoCapability, SecurityLevel,
    SimulatorConfig, SocketKind, TimestampFlags, Transport,
};
use l2cap_stream::{frames_per_sdu, TimestampKind};
use l2cap_transport::control::STATUS_INVALID_PARAMS;
use l2cap_transport::{
    MgmtError, PairingReply, PairingRequest, PeerEvent, PeerServer, Received, Shutdown, SockAddr,
    SocketId,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::events::Subscribers;
use super::socket::{Channel, SimSocket, SockState};
use super::PEER_ADDRESS;

/// Receive MTU of every local channel.
pub(crate) const LOCAL_MTU: u16 = 672;
pub(crate) const LOCAL_LE_MPS: u16 = 188;
pub(crate) const LOCAL_LE_CREDITS: u16 = 4;

/// What a peer server offers when the case does not pin it.
pub(crate) const PEER_DEFAULT_CREDITS: CreditParameters =
    CreditParameters { mtu: 672, mps: 251, credits: 10 };

const SCAN_PAGE: u8 = 0x02;
const SDP_PSM: u16 = 0x0001;
const FIRST_HANDLE: u16 = 0x002a;
const COMPARISON_PASSKEY: u32 = 123_456;

/// Management settings of the local controller.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Settings {
    pub powered: bool,
    pub le: bool,
    pub ssp: bool,
    pub bondable: bool,
    pub connectable: bool,
    pub advertising: bool,
}

/// The emulated remote host.
#[derive(Debug)]
pub(crate) struct PeerState {
    pub address: BdAddr,
    pub advertising: bool,
    pub scan_mode: u8,
    pub ssp: bool,
    pub io_capability: IoCapability,
    pub pin: Option<Vec<u8>>,
    pub reject_confirm: bool,
    pub servers: HashMap<u16, PeerServer>,
    next_ident: u8,
}

impl PeerState {
    fn new() -> Self {
        Self {
            address: PEER_ADDRESS,
            advertising: false,
            scan_mode: 0,
            ssp: false,
            io_capability: IoCapability::NoInputNoOutput,
            pin: None,
            reject_confirm: false,
            servers: HashMap::new(),
            next_ident: 1,
        }
    }

    pub(crate) fn next_ident(&mut self) -> u8 {
        next_ident(&mut self.next_ident)
    }

    /// Credit parameters the peer answers with for `psm`, `None` without a
    /// server.
    pub(crate) fn credits_for(&self, psm: u16) -> Option<CreditParameters> {
        let server = self.servers.get(&psm)?;
        let pinned = server.credits.unwrap_or(PEER_DEFAULT_CREDITS);
        let or_default = |value: u16, default: u16| if value == 0 { default } else { value };
        Some(CreditParameters {
            mtu: or_default(pinned.mtu, PEER_DEFAULT_CREDITS.mtu),
            mps: or_default(pinned.mps, PEER_DEFAULT_CREDITS.mps),
            credits: or_default(pinned.credits, PEER_DEFAULT_CREDITS.credits),
        })
    }
}

fn next_ident(counter: &mut u8) -> u8 {
    let ident = *counter;
    *counter = if ident == u8::MAX { 1 } else { ident + 1 };
    ident
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Pairing {
    pub level: SecurityLevel,
    /// PIN based rather than simple pairing.
    pub legacy: bool,
}

/// A local signalling request waiting for its response.
#[derive(Debug)]
pub(crate) struct Request {
    pub psm: u16,
    /// Requesting sockets with the local cid each was given.
    pub targets: Vec<(SocketId, u16)>,
}

#[derive(Debug)]
pub(crate) struct Link {
    pub handle: u16,
    pub le: bool,
    pub peer: BdAddr,
    pub security: SecurityLevel,
    pub pairing: Option<Pairing>,
    /// Sockets waiting for pairing to finish.
    pub waiting: Vec<SocketId>,
    pub requests: HashMap<u8, Request>,
    next_ident: u8,
    next_local_cid: u16,
    next_peer_cid: u16,
}

impl Link {
    fn new(handle: u16, le: bool, peer: BdAddr) -> Self {
        Self {
            handle,
            le,
            peer,
            security: SecurityLevel::Low,
            pairing: None,
            waiting: Vec::new(),
            requests: HashMap::new(),
            next_ident: 1,
            next_local_cid: l2cap_core::signal::CID_DYN_START,
            next_peer_cid: l2cap_core::signal::CID_DYN_START,
        }
    }

    pub(crate) fn next_ident(&mut self) -> u8 {
        next_ident(&mut self.next_ident)
    }

    pub(crate) fn alloc_local_cid(&mut self) -> u16 {
        let cid = self.next_local_cid;
        self.next_local_cid = self.next_local_cid.wrapping_add(1);
        cid
    }

    pub(crate) fn alloc_peer_cid(&mut self) -> u16 {
        let cid = self.next_peer_cid;
        self.next_peer_cid = self.next_peer_cid.wrapping_add(1);
        cid
    }
}

/// Incoming channels held by a deferred listener until every one of them is
/// authorised.
#[derive(Debug)]
pub(crate) struct HeldBatch {
    pub handle: u16,
    pub code: u8,
    pub children: Vec<SocketId>,
    pub scids: Vec<u16>,
    pub authorized: Vec<SocketId>,
}

pub(crate) struct World {
    pub config: SimulatorConfig,
    pub transport: Transport,
    pub settings: Settings,
    /// LE passive scanning of the local controller.
    pub scanning: bool,
    /// Connection creation issued but not completed.
    pub pending_create: Option<BdAddr>,
    pub peer: PeerState,
    pub links: Vec<Link>,
    pub sockets: BTreeMap<SocketId, SimSocket>,
    pub held: Vec<HeldBatch>,
    pub subs: Subscribers,
    next_socket: u32,
    next_handle: u16,
    started: Instant,
}

impl World {
    pub(crate) fn new(transport: Transport, config: SimulatorConfig) -> Self {
        Self {
            config,
            transport,
            settings: Settings::default(),
            scanning: false,
            pending_create: None,
            peer: PeerState::new(),
            links: Vec::new(),
            sockets: BTreeMap::new(),
            held: Vec::new(),
            subs: Subscribers::default(),
            next_socket: 1,
            next_handle: FIRST_HANDLE,
            started: Instant::now(),
        }
    }

    pub(crate) fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub(crate) fn link_count(&self) -> usize {
        self.links.len()
    }

    pub(crate) fn now(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn alloc(&mut self, socket: SimSocket) -> SocketId {
        let id = SocketId(self.next_socket);
        self.next_socket += 1;
        self.sockets.insert(id, socket);
        id
    }

    pub(crate) fn socket(&self, sk: SocketId) -> Result<&SimSocket, Errno> {
        self.sockets.get(&sk).ok_or(Errno::EBADF)
    }

    pub(crate) fn socket_mut(&mut self, sk: SocketId) -> Result<&mut SimSocket, Errno> {
        self.sockets.get_mut(&sk).ok_or(Errno::EBADF)
    }

    pub(crate) fn link(&self, handle: u16) -> Option<&Link> {
        self.links.iter().find(|l| l.handle == handle)
    }

    pub(crate) fn link_mut(&mut self, handle: u16) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.handle == handle)
    }

    fn link_to(&self, peer: BdAddr, le: bool) -> Option<u16> {
        self.links.iter().find(|l| l.peer == peer && l.le == le).map(|l| l.handle)
    }

    fn establish_link(&mut self, peer: BdAddr, le: bool) -> u16 {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.links.push(Link::new(handle, le, peer));
        info!(handle, le, %peer, "link up");
        self.subs.peer_event(PeerEvent::Connected { handle });
        if le {
            self.attach_fixed_channels(handle);
        }
        handle
    }

    /// Every LE link carries the ATT channel; ATT listeners get a child.
    fn attach_fixed_channels(&mut self, handle: u16) {
        let Some(peer) = self.link(handle).map(|l| l.peer) else {
            return;
        };
        let listeners: Vec<SocketId> = self
            .sockets
            .iter()
            .filter(|(_, s)| s.state == SockState::Listening)
            .filter(|(_, s)| {
                s.local.is_some_and(|a| a.addr_type.is_le() && a.psm == 0 && a.cid == CID_ATT)
            })
            .map(|(id, _)| *id)
            .collect();
        for listener in listeners {
            let channel = fixed_channel(handle, CID_ATT);
            let remote =
                SockAddr { bdaddr: peer, addr_type: AddressType::LePublic, psm: 0, cid: CID_ATT };
            if let Some(child) = self.add_child(listener, remote, channel, false) {
                debug!(%listener, %child, "ATT channel attached");
            }
        }
    }

    /// Create a child of `listener` and queue it for `accept`.
    pub(crate) fn add_child(
        &mut self,
        listener: SocketId,
        remote: SockAddr,
        channel: Channel,
        held: bool,
    ) -> Option<SocketId> {
        let parent = self.sockets.get(&listener)?;
        let child = SimSocket::child_of(parent, listener, remote, channel, held);
        let id = self.alloc(child);
        if let Some(parent) = self.sockets.get_mut(&listener) {
            parent.accept_queue.push_back(id);
        }
        Some(id)
    }

    /// Remove a socket nobody owns yet.
    pub(crate) fn discard(&mut self, sk: SocketId) {
        let Some(socket) = self.sockets.remove(&sk) else {
            return;
        };
        if let Some(parent) = socket.parent.and_then(|p| self.sockets.get_mut(&p)) {
            parent.accept_queue.retain(|child| *child != sk);
        }
    }

    pub(crate) fn find_listener(&self, le: bool, psm: u16) -> Option<SocketId> {
        self.sockets
            .iter()
            .find(|(_, s)| {
                s.state == SockState::Listening
                    && s.local.is_some_and(|a| a.addr_type.is_le() == le && a.psm == psm)
            })
            .map(|(id, _)| *id)
    }

    /// Security a channel on `psm` needs. Simple pairing on both sides
    /// upgrades everything but SDP to authenticated.
    pub(crate) fn effective_security(
        &self,
        level: SecurityLevel,
        psm: u16,
        le: bool,
    ) -> SecurityLevel {
        let ssp = !le && self.settings.ssp && self.peer.ssp;
        if ssp && psm != 0 && psm != SDP_PSM && level < SecurityLevel::Medium {
            SecurityLevel::Medium
        } else {
            level
        }
    }

    /// Targets of connecting sockets on `le` links that have no link yet.
    fn awaiting_link(&self, le: bool) -> Vec<BdAddr> {
        self.sockets
            .values()
            .filter(|s| s.state == SockState::Connecting { requested: false })
            .filter_map(|s| s.remote)
            .filter(|r| r.addr_type.is_le() == le && self.link_to(r.bdaddr, le).is_none())
            .map(|r| r.bdaddr)
            .collect()
    }

    // Outgoing connections

    /// Validate and record a connect; returns the send timeout to arm.
    pub(crate) fn begin_connect(
        &mut self,
        sk: SocketId,
        addr: SockAddr,
    ) -> Result<Option<Duration>, Errno> {
        let le = addr.addr_type.is_le();
        let reachable = self.settings.powered
            && if le {
                self.transport.is_le() && self.settings.le
            } else {
                !self.transport.is_le()
            };
        let socket = self.socket_mut(sk)?;
        match socket.state {
            SockState::Open => {}
            SockState::Connecting { .. } => return Err(Errno::EALREADY),
            SockState::Connected => return Err(Errno::EISCONN),
            _ => return Err(Errno::EBADFD),
        }
        if addr.psm == 0 && addr.cid == 0 {
            return Err(Errno::EINVAL);
        }
        if !reachable {
            debug!(%sk, le, "no route to the peer transport");
            return Err(Errno::EHOSTUNREACH);
        }
        socket.remote = Some(addr);
        socket.state = SockState::Connecting { requested: false };
        socket.connect_attempted = true;
        Ok(socket.send_timeout)
    }

    /// Take a pending connect one step further.
    pub(crate) fn progress_connect(&mut self, sk: SocketId) {
        let Some(remote) = self
            .sockets
            .get(&sk)
            .filter(|s| s.state == SockState::Connecting { requested: false })
            .and_then(|s| s.remote)
        else {
            return;
        };
        let le = remote.addr_type.is_le();
        match self.link_to(remote.bdaddr, le) {
            Some(handle) => self.open_pending(handle),
            None if le => self.seek_le(remote.bdaddr),
            None => self.page(remote.bdaddr),
        }
    }

    pub(crate) fn expire_connect(&mut self, sk: SocketId) {
        let Some(socket) = self.sockets.get_mut(&sk).filter(|s| s.is_connecting()) else {
            return;
        };
        info!(%sk, "connect timed out");
        socket.conclude(Some(Errno::ETIMEDOUT));
        for link in &mut self.links {
            link.waiting.retain(|w| *w != sk);
        }
        self.scan_idle();
    }

    fn seek_le(&mut self, target: BdAddr) {
        if self.settings.advertising {
            debug!(%target, "directed advertising");
            self.subs.command(HciCommand::le_adv_parameters(ADV_DIRECT_IND, 0x00, target));
            if target == self.peer.address {
                let handle = self.establish_link(target, true);
                self.open_pending(handle);
            }
            return;
        }
        if self.pending_create.is_some() {
            return;
        }
        if self.scanning {
            // The accept list changed; scanning restarts.
            self.set_scan(false);
        }
        self.set_scan(true);
        self.scan_match();
    }

    fn set_scan(&mut self, enable: bool) {
        self.scanning = enable;
        debug!(enable, "LE scan");
        self.subs.command(HciCommand::le_scan_enable(enable));
    }

    /// Connect to the peer once it is both advertising and wanted.
    pub(crate) fn scan_match(&mut self) {
        if !self.scanning || !self.peer.advertising {
            return;
        }
        let peer = self.peer.address;
        if !self.awaiting_link(true).contains(&peer) {
            return;
        }
        self.set_scan(false);
        self.subs.command(HciCommand::le_create_conn(peer, 0x00));
        if self.subs.is_suppressed(opcode::LE_CREATE_CONN) {
            debug!(%peer, "connection complete withheld");
            self.pending_create = Some(peer);
            return;
        }
        let handle = self.establish_link(peer, true);
        self.open_pending(handle);
    }

    /// Stop scanning or cancel creation once no LE socket waits any more.
    pub(crate) fn scan_idle(&mut self) {
        if !self.awaiting_link(true).is_empty() {
            return;
        }
        if self.scanning {
            self.set_scan(false);
        }
        if let Some(peer) = self.pending_create.take() {
            debug!(%peer, "connection creation cancelled");
            self.subs.command(HciCommand::new(opcode::LE_CREATE_CONN_CANCEL, Vec::new()));
        }
    }

    fn page(&mut self, target: BdAddr) {
        self.subs.command(HciCommand::new(opcode::CREATE_CONN, target.as_bytes().to_vec()));
        if target == self.peer.address && self.peer.scan_mode & SCAN_PAGE != 0 {
            let handle = self.establish_link(target, false);
            self.open_pending(handle);
        } else {
            debug!(%target, "page unanswered");
        }
    }

    /// The peer turned page scan on: page it for waiting sockets.
    pub(crate) fn page_waiting(&mut self) {
        let peer = self.peer.address;
        if self.awaiting_link(false).contains(&peer) {
            self.page(peer);
        }
    }

    /// Secure and request every socket still waiting for link `handle`.
    pub(crate) fn open_pending(&mut self, handle: u16) {
        let Some((peer, le)) = self.link(handle).map(|l| (l.peer, l.le)) else {
            return;
        };
        let pending: Vec<SocketId> = self
            .sockets
            .iter_mut()
            .filter(|(_, s)| s.state == SockState::Connecting { requested: false })
            .filter(|(_, s)| {
                s.remote.is_some_and(|r| r.bdaddr == peer && r.addr_type.is_le() == le)
            })
            .map(|(id, s)| {
                s.state = SockState::Connecting { requested: true };
                *id
            })
            .collect();
        if !pending.is_empty() {
            self.start_channels(handle, pending);
        }
    }

    fn start_channels(&mut self, handle: u16, sockets: Vec<SocketId>) {
        let mut ready = Vec::new();
        for sk in sockets {
            let Some(socket) = self.sockets.get(&sk).filter(|s| s.is_connecting()) else {
                continue;
            };
            let psm = socket.remote.map_or(0, |r| r.psm);
            let Some(le) = self.link(handle).map(|l| l.le) else {
                return;
            };
            let required = self.effective_security(socket.security, psm, le);
            let Some(link) = self.link_mut(handle) else {
                return;
            };
            if link.security >= required {
                ready.push(sk);
                continue;
            }
            link.waiting.push(sk);
            let pairing = link.pairing.is_some();
            if let Some(p) = link.pairing.as_mut() {
                p.level = p.level.max(required);
            }
            if !pairing {
                self.start_pairing(handle, required);
            }
        }
        if !ready.is_empty() {
            self.send_requests(handle, ready);
        }
    }

    fn start_pairing(&mut self, handle: u16, level: SecurityLevel) {
        let simple = self.settings.ssp && self.peer.ssp;
        let passkey = match self.peer.io_capability {
            IoCapability::DisplayOnly
            | IoCapability::DisplayYesNo
            | IoCapability::KeyboardDisplay => {
                COMPARISON_PASSKEY
            }
            IoCapability::KeyboardOnly | IoCapability::NoInputNoOutput => 0,
        };
        let Some(link) = self.link_mut(handle) else {
            return;
        };
        let legacy = !link.le && !simple;
        link.pairing = Some(Pairing { level, legacy });
        let (peer, le) = (link.peer, link.le);
        let request = if legacy {
            PairingRequest::PinCode { addr: peer, secure: level == SecurityLevel::High }
        } else {
            PairingRequest::UserConfirm { addr: peer, passkey }
        };
        if !le {
            let params = handle.to_le_bytes().to_vec();
            self.subs.command(HciCommand::new(opcode::AUTH_REQUESTED, params));
        }
        debug!(handle, ?level, legacy, "pairing started");
        if !self.subs.pairing(request) {
            warn!(handle, "no pairing agent registered");
        }
    }

    /// Apply a pairing reply from the management interface.
    pub(crate) fn finish_pairing(&mut self, reply: &PairingReply) -> Result<(), MgmtError> {
        let (addr, legacy) = match reply {
            PairingReply::Confirm { addr, .. } => (*addr, false),
            PairingReply::Pin { addr, .. } | PairingReply::PinNegative { addr } => (*addr, true),
        };
        let accepted = match reply {
            PairingReply::Confirm { accept, .. } => *accept && !self.peer.reject_confirm,
            PairingReply::Pin { pin, .. } => self.peer.pin.as_deref() == Some(pin.as_slice()),
            PairingReply::PinNegative { .. } => false,
        };
        let Some(link) = self
            .links
            .iter_mut()
            .find(|l| l.peer == addr && l.pairing.is_some_and(|p| p.legacy == legacy))
        else {
            return Err(MgmtError::Status {
                command: "Pairing Reply",
                status: STATUS_INVALID_PARAMS,
            });
        };
        let pairing = link.pairing.take();
        let waiting = std::mem::take(&mut link.waiting);
        let (handle, le) = (link.handle, link.le);
        if !accepted {
            warn!(handle, %addr, "pairing failed");
            for sk in waiting {
                self.fail_connect(sk, Errno::EACCES);
            }
            return Ok(());
        }
        if let Some(pairing) = pairing {
            link.security = link.security.max(pairing.level);
        }
        info!(handle, %addr, "paired");
        if le {
            let params = handle.to_le_bytes().to_vec();
            self.subs.command(HciCommand::new(opcode::LE_START_ENCRYPT, params));
        }
        self.start_channels(handle, waiting);
        Ok(())
    }

    /// The channel of a connecting socket is up.
    pub(crate) fn establish(&mut self, sk: SocketId, channel: Channel) {
        let Some(socket) = self.sockets.get_mut(&sk).filter(|s| s.is_connecting()) else {
            return;
        };
        let event = PeerEvent::ChannelConnected {
            handle: channel.handle,
            psm: channel.psm,
            peer_cid: channel.peer_cid,
            local_cid: channel.local_cid,
        };
        info!(
            %sk,
            handle = channel.handle,
            local_cid = channel.local_cid,
            peer_cid = channel.peer_cid,
            "channel connected"
        );
        socket.channel = Some(channel);
        socket.state = SockState::Connected;
        self.subs.peer_event(event);
    }

    pub(crate) fn fail_connect(&mut self, sk: SocketId, errno: Errno) {
        if let Some(socket) = self.sockets.get_mut(&sk).filter(|s| s.is_connecting()) {
            info!(%sk, %errno, "connect failed");
            socket.conclude(Some(errno));
        }
        self.scan_idle();
    }

    // Incoming links

    /// The peer connects to the local controller.
    pub(crate) fn incoming_link(&mut self, addr_type: AddressType) {
        let le = addr_type.is_le();
        let reachable = self.settings.powered
            && if le {
                self.settings.le && self.settings.advertising
            } else {
                self.settings.connectable
            };
        if !reachable {
            debug!(le, "local controller not connectable");
            return;
        }
        let peer = self.peer.address;
        if self.link_to(peer, le).is_none() {
            self.establish_link(peer, le);
        }
    }

    /// Power off drops every link.
    pub(crate) fn power_off(&mut self) {
        self.scanning = false;
        self.pending_create = None;
        for link in std::mem::take(&mut self.links) {
            debug!(handle = link.handle, "link down");
        }
        let sockets: Vec<SocketId> = self.sockets.keys().copied().collect();
        for sk in sockets {
            if let Some(socket) = self.sockets.get_mut(&sk) {
                match socket.state {
                    SockState::Connecting { .. } => socket.conclude(Some(Errno::EHOSTDOWN)),
                    SockState::Connected | SockState::Deferred => socket.state = SockState::Closed,
                    _ => {}
                }
            }
        }
    }

    // Data path

    /// Queue one SDU for the peer and send whatever the credits allow.
    pub(crate) fn transmit(&mut self, sk: SocketId, data: &[u8]) -> Result<usize, Errno> {
        let socket = self.socket_mut(sk)?;
        match socket.state {
            SockState::Connected if !socket.write_shut => {}
            SockState::Connected | SockState::Closed => return Err(Errno::EPIPE),
            _ => return Err(Errno::ENOTCONN),
        }
        let omtu = socket.channel.as_ref().map_or(0, |c| c.omtu);
        if socket.kind == SocketKind::DatagramSeq && data.len() > usize::from(omtu) {
            return Err(Errno::EMSGSIZE);
        }
        let queued: usize = socket.tx_queue.iter().map(|(sdu, _)| sdu.len()).sum();
        if queued + data.len() > socket.send_buffer {
            return Err(Errno::EAGAIN);
        }
        let key = socket.next_tx_key(data.len());
        socket.report(TimestampFlags::TX_SCHED, key, TimestampKind::Enter);
        socket.report(TimestampFlags::TX_SOFTWARE, key, TimestampKind::Software);
        socket.tx_queue.push_back((Bytes::copy_from_slice(data), key));
        self.flush(sk);
        Ok(data.len())
    }

    fn flush(&mut self, sk: SocketId) {
        loop {
            let Some(socket) = self.sockets.get_mut(&sk) else {
                return;
            };
            let Some(channel) = socket.channel.as_mut() else {
                return;
            };
            let Some((sdu, _)) = socket.tx_queue.front() else {
                return;
            };
            if let Some(window) = channel.credits.as_mut() {
                let Ok(frames) = frames_per_sdu(sdu.len(), channel.mps) else {
                    warn!(%sk, mps = channel.mps, "unusable MPS");
                    return;
                };
                if window.available() < frames as u32 {
                    trace!(%sk, frames, available = window.available(), "waiting for credits");
                    return;
                }
                for _ in 0..frames {
                    window.try_consume();
                }
            }
            let (handle, peer_cid) = (channel.handle, channel.peer_cid);
            let Some((sdu, key)) = socket.tx_queue.pop_front() else {
                return;
            };
            socket.report(TimestampFlags::TX_COMPLETION, key, TimestampKind::Completion);
            trace!(%sk, handle, peer_cid, len = sdu.len(), "SDU to peer");
            self.subs.hook(handle, peer_cid, &sdu);
        }
    }

    /// Data the peer sent on a channel of link `handle`.
    pub(crate) fn deliver_inbound(&mut self, handle: u16, cid: u16, data: &[u8]) {
        let now = self.now();
        let target = self.sockets.values_mut().find(|s| {
            s.state == SockState::Connected
                && s.channel.as_ref().is_some_and(|c| c.handle == handle && c.local_cid == cid)
        });
        match target {
            Some(socket) => {
                let timestamp = socket.timestamping.records_rx().then_some(now);
                socket.rx.push_back((Bytes::copy_from_slice(data), timestamp));
            }
            None => trace!(handle, cid, len = data.len(), "no local channel, dropped"),
        }
    }

    pub(crate) fn receive(&mut self, sk: SocketId, buf: &mut [u8]) -> Result<Received, Errno> {
        let socket = self.socket_mut(sk)?;
        if socket.state == SockState::Deferred {
            self.authorize(sk);
            return Ok(Received { len: 0, timestamp: None });
        }
        let Some((data, timestamp)) = socket.rx.pop_front() else {
            return match socket.state {
                SockState::Closed => Ok(Received { len: 0, timestamp: None }),
                SockState::Connected => Err(Errno::EAGAIN),
                _ => Err(Errno::ENOTCONN),
            };
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        if socket.kind == SocketKind::Stream && len < data.len() {
            socket.rx.push_front((data.slice(len..), timestamp));
        }
        Ok(Received { len, timestamp })
    }

    // Teardown of sockets

    pub(crate) fn shutdown(&mut self, sk: SocketId, how: Shutdown) -> Result<(), Errno> {
        let socket = self.socket_mut(sk)?;
        match socket.state {
            SockState::Connecting { .. } => {
                debug!(%sk, "pending connect aborted");
                socket.conclude(None);
                self.scan_idle();
                Ok(())
            }
            SockState::Connected if how == Shutdown::Read => Ok(()),
            SockState::Connected => {
                socket.write_shut = true;
                socket.state = SockState::Closed;
                if let Some(channel) = socket.channel.clone() {
                    debug!(%sk, peer_cid = channel.peer_cid, "channel disconnected");
                    self.subs.peer_event(PeerEvent::ChannelDisconnected {
                        handle: channel.handle,
                        peer_cid: channel.peer_cid,
                    });
                }
                Ok(())
            }
            SockState::Closed => Ok(()),
            _ => Err(Errno::ENOTCONN),
        }
    }

    pub(crate) fn close(&mut self, sk: SocketId) {
        let Some(socket) = self.sockets.remove(&sk) else {
            return;
        };
        if let Some(parent) = socket.parent.and_then(|p| self.sockets.get_mut(&p)) {
            parent.accept_queue.retain(|child| *child != sk);
        }
        for link in &mut self.links {
            link.waiting.retain(|w| *w != sk);
        }
        match socket.state {
            SockState::Connecting { .. } => {
                debug!(%sk, "pending connect abandoned");
                self.scan_idle();
            }
            SockState::Deferred => self.reject_held(sk),
            SockState::Connected => {
                if let Some(channel) = socket.channel {
                    self.subs.peer_event(PeerEvent::ChannelDisconnected {
                        handle: channel.handle,
                        peer_cid: channel.peer_cid,
                    });
                }
            }
            SockState::Listening => {
                for child in socket.accept_queue {
                    self.close(child);
                }
            }
            SockState::Open | SockState::Closed => {}
        }
        trace!(%sk, "socket released");
    }
}

/// A fixed channel: same cid on both ends, no signalling.
pub(crate) fn fixed_channel(handle: u16, cid: u16) -> Channel {
    Channel {
        handle,
        local_cid: cid,
        peer_cid: cid,
        psm: 0,
        imtu: LOCAL_MTU,
        omtu: LOCAL_MTU,
        mps: 0,
        credits: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(transport: Transport) -> World {
        let mut world = World::new(transport, SimulatorConfig::default());
        world.settings.powered = true;
        world.settings.le = transport.is_le();
        world
    }

    fn connecting(world: &mut World, addr_type: AddressType, psm: u16) -> SocketId {
        let sk = world.alloc(SimSocket::new(SocketKind::DatagramSeq));
        let addr = SockAddr { bdaddr: PEER_ADDRESS, addr_type, psm, cid: 0 };
        world.begin_connect(sk, addr).unwrap();
        sk
    }

    #[tokio::test]
    async fn le_address_needs_le_controller() {
        let mut world = world(Transport::BrEdr);
        let sk = world.alloc(SimSocket::new(SocketKind::DatagramSeq));
        let addr =
            SockAddr { bdaddr: PEER_ADDRESS, addr_type: AddressType::LePublic, psm: 0x80, cid: 0 };
        assert_eq!(world.begin_connect(sk, addr), Err(Errno::EHOSTUNREACH));
    }

    #[tokio::test]
    async fn scan_finds_advertising_peer() {
        let mut world = world(Transport::Le);
        let mut commands = world.subs.subscribe_commands();
        world.peer.advertising = true;
        world.peer.servers.insert(0x80, PeerServer { psm: 0x80, credits: None });
        let sk = connecting(&mut world, AddressType::LePublic, 0x80);
        world.progress_connect(sk);

        assert_eq!(commands.try_recv().unwrap().scan_enable(), Some(true));
        assert_eq!(commands.try_recv().unwrap().scan_enable(), Some(false));
        assert_eq!(commands.try_recv().unwrap().opcode, opcode::LE_CREATE_CONN);
        assert!(!world.scanning);
        assert_eq!(world.socket(sk).unwrap().state, SockState::Connected);
        let channel = world.socket(sk).unwrap().channel.clone().unwrap();
        assert_eq!(channel.omtu, 672);
        assert_eq!(channel.mps, 251);
        assert_eq!(channel.credits.map(|c| c.available()), Some(10));
    }

    #[tokio::test]
    async fn closing_last_pending_socket_stops_scan() {
        let mut world = world(Transport::Le);
        let sk = connecting(&mut world, AddressType::LePublic, 0x80);
        world.progress_connect(sk);
        assert!(world.scanning);
        world.close(sk);
        assert!(!world.scanning);
    }

    #[tokio::test]
    async fn bredr_page_needs_page_scan() {
        let mut world = world(Transport::BrEdr);
        let sk = connecting(&mut world, AddressType::BrEdr, 0x1001);
        world.progress_connect(sk);
        assert_eq!(world.link_count(), 0);
        world.peer.scan_mode = 0x03;
        world.page_waiting();
        assert_eq!(world.link_count(), 1);
        // No server on the peer.
        assert_eq!(world.socket_mut(sk).unwrap().error.take(), Some(Errno::ECONNREFUSED));
    }

    #[tokio::test]
    async fn credits_gate_transmission() {
        let mut world = world(Transport::Le);
        let sk = world.alloc(SimSocket::new(SocketKind::DatagramSeq));
        let socket = world.socket_mut(sk).unwrap();
        socket.state = SockState::Connected;
        socket.channel = Some(Channel {
            handle: 1,
            local_cid: 0x40,
            peer_cid: 0x40,
            psm: 0x80,
            imtu: 672,
            omtu: 672,
            mps: 251,
            credits: Some(l2cap_stream::CreditWindow::new(4)),
        });
        let mut hook = world.subs.subscribe_hook(None, 0x40);
        assert_eq!(world.transmit(sk, &[0u8; 670]), Ok(670));
        assert_eq!(world.transmit(sk, &[1u8; 670]), Ok(670));
        assert_eq!(hook.try_recv().unwrap().data.len(), 670);
        assert!(hook.try_recv().is_err());
        assert_eq!(world.socket(sk).unwrap().tx_queue.len(), 1);
    }
}

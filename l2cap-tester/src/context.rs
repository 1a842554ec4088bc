#![forbid(unsafe_code)]

//! Per-case state and the event loop scenarios wait on.

use async_trait::async_trait;
use futures::stream::{SelectAll, StreamExt};
use l2cap_core::{
    BdAddr, CaseError, ConnectionParameters, HciCommand, Transport,
};
use l2cap_transport::{
    ConnectionDriver, ControlPlane, Fired, HookData, HookGuard, PairingReply, PairingRequest,
    PeerEvent, PeerHost, Readiness, SockAddr, SocketId, SocketLayer, WatchId, WatchSet,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use crate::lifecycle::TestCase;

/// The three collaborators a case talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub sockets: Arc<dyn SocketLayer>,
    pub peer: Arc<dyn PeerHost>,
    pub control: Arc<dyn ControlPlane>,
}

/// Provides fresh collaborators for each case.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn bring_up(&self, transport: Transport) -> Result<Collaborators, CaseError>;
}

/// Something a scenario may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ready(Fired),
    Command(HciCommand),
    Peer(PeerEvent),
    Hook(HookData),
}

/// Identifiers of the link and channel the peer reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub handle: Option<u16>,
    /// Peer end of the channel, where local writes arrive.
    pub peer_cid: Option<u16>,
    /// Local end of the channel, where peer writes are addressed.
    pub local_cid: Option<u16>,
    pub host_disconnected: bool,
}

enum Incoming {
    Pairing(PairingRequest),
    Event(Event),
}

pub struct TestContext {
    name: String,
    transport: Transport,
    params: Arc<ConnectionParameters>,
    sockets: Arc<dyn SocketLayer>,
    peer: Arc<dyn PeerHost>,
    control: Arc<dyn ControlPlane>,
    driver: ConnectionDriver,
    watches: WatchSet,
    index: Option<u16>,
    open: Vec<SocketId>,
    peer_events: Option<UnboundedReceiver<PeerEvent>>,
    commands: Option<UnboundedReceiver<HciCommand>>,
    pairing: Option<UnboundedReceiver<PairingRequest>>,
    hooks: SelectAll<UnboundedReceiverStream<HookData>>,
    guards: Vec<HookGuard>,
    pub link: LinkState,
}

impl TestContext {
    pub fn new(case: &TestCase, collaborators: Collaborators) -> Self {
        let Collaborators { sockets, peer, control } = collaborators;
        let driver =
            ConnectionDriver::new(Arc::clone(&sockets), case.transport, peer.central_address());
        let watches = WatchSet::new(Arc::clone(&sockets));
        Self {
            name: case.name.clone(),
            transport: case.transport,
            params: Arc::clone(&case.params),
            sockets,
            peer,
            control,
            driver,
            watches,
            index: None,
            open: Vec::new(),
            peer_events: None,
            commands: None,
            pairing: None,
            hooks: SelectAll::new(),
            guards: Vec::new(),
            link: LinkState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn params(&self) -> Arc<ConnectionParameters> {
        Arc::clone(&self.params)
    }

    pub fn driver(&self) -> &ConnectionDriver {
        &self.driver
    }

    // Owned handles, so phase futures never hold a borrow of the context
    // across a suspension point.
    pub fn sockets(&self) -> Arc<dyn SocketLayer> {
        Arc::clone(&self.sockets)
    }

    pub fn peer(&self) -> Arc<dyn PeerHost> {
        Arc::clone(&self.peer)
    }

    pub fn control(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.control)
    }

    pub fn index(&self) -> Result<u16, CaseError> {
        self.index.ok_or_else(|| CaseError::failed("no controller index"))
    }

    pub fn set_index(&mut self, index: u16) {
        self.index = Some(index);
    }

    /// Where outgoing connections go: the emulated peer unless the case
    /// names another address, on the client PSM or fixed channel.
    pub fn peer_sockaddr(&self) -> SockAddr {
        SockAddr {
            bdaddr: self.params.peer_address.unwrap_or_else(|| self.peer.address()),
            addr_type: self.params.address_type_for(self.transport),
            psm: self.params.client_service_id.unwrap_or(0),
            cid: self.params.channel_id.unwrap_or(0),
        }
    }

    pub fn central_address(&self) -> BdAddr {
        self.peer.central_address()
    }

    /// Open a channel socket owned by this context.
    pub fn open_channel(&mut self, psm: u16) -> Result<SocketId, CaseError> {
        let sk = self.driver.open_channel(&self.params, psm)?;
        self.open.push(sk);
        Ok(sk)
    }

    pub fn accept(&mut self, listener: SocketId) -> Result<SocketId, CaseError> {
        let sk = self.driver.accept(listener)?;
        self.open.push(sk);
        Ok(sk)
    }

    pub fn close_socket(&mut self, sk: SocketId) {
        let cancelled = self.watches.cancel_socket(sk);
        self.open.retain(|s| *s != sk);
        self.sockets.close(sk);
        debug!(%sk, cancelled, "socket closed");
    }

    pub fn watch(&mut self, sk: SocketId, interest: Readiness) -> WatchId {
        self.watches.add(sk, interest)
    }

    pub fn subscribe_peer(&mut self) {
        if self.peer_events.is_none() {
            self.peer_events = Some(self.peer.subscribe());
        }
    }

    pub fn subscribe_commands(&mut self) {
        if self.commands.is_none() {
            self.commands = Some(self.peer.command_tap());
        }
    }

    pub fn subscribe_pairing(&mut self) -> Result<(), CaseError> {
        if self.pairing.is_none() {
            let index = self.index()?;
            self.pairing = Some(self.control.subscribe_pairing(index));
        }
        Ok(())
    }

    /// Divert what the local stack sends to the peer's `cid`.
    pub fn hook(&mut self, handle: Option<u16>, cid: u16) {
        self.hooks.push(UnboundedReceiverStream::new(self.peer.add_cid_hook(handle, cid)));
    }

    /// Keep a peer-side filter installed until teardown.
    pub fn hold(&mut self, guard: HookGuard) {
        self.guards.push(guard);
    }

    /// Wait for the next event. Pairing requests are answered here and never
    /// reach the scenario. Peer events take precedence over socket readiness
    /// so identifiers the peer reports are known before the socket is used.
    pub async fn next_event(&mut self) -> Result<Event, CaseError> {
        loop {
            let incoming = tokio::select! {
                biased;
                Some(request) = recv(&mut self.pairing) => Incoming::Pairing(request),
                Some(cmd) = recv(&mut self.commands) => Incoming::Event(Event::Command(cmd)),
                Some(event) = recv(&mut self.peer_events) => Incoming::Event(Event::Peer(event)),
                Some(data) = self.hooks.next() => Incoming::Event(Event::Hook(data)),
                Some(fired) = self.watches.next() => Incoming::Event(Event::Ready(fired)),
                else => return Err(CaseError::failed("no event source left to wait on")),
            };
            match incoming {
                Incoming::Pairing(request) => self.answer_pairing(request).await?,
                Incoming::Event(event) => {
                    if let Event::Peer(peer_event) = &event {
                        self.note_peer_event(peer_event);
                    }
                    trace!(case = %self.name, ?event, "event");
                    return Ok(event);
                }
            }
        }
    }

    fn note_peer_event(&mut self, event: &PeerEvent) {
        match *event {
            PeerEvent::Connected { handle } => self.link.handle = Some(handle),
            PeerEvent::ChannelConnected { handle, peer_cid, local_cid, .. } => {
                self.link.handle = Some(handle);
                self.link.peer_cid = Some(peer_cid);
                self.link.local_cid = Some(local_cid);
            }
            PeerEvent::ChannelDisconnected { .. } => self.link.host_disconnected = true,
            PeerEvent::SignalResponse { .. } => {}
        }
    }

    async fn answer_pairing(&mut self, request: PairingRequest) -> Result<(), CaseError> {
        let reply = match request {
            PairingRequest::UserConfirm { addr, passkey } => {
                debug!(%addr, passkey, reject = self.params.reject_pairing, "user confirmation");
                PairingReply::Confirm { addr, accept: !self.params.reject_pairing }
            }
            PairingRequest::PinCode { addr, .. } => match &self.params.pin {
                Some(pin) => PairingReply::Pin { addr, pin: pin.to_vec() },
                None if self.params.expect_pin => PairingReply::PinNegative { addr },
                None => {
                    debug!(%addr, "PIN request left unanswered");
                    return Ok(());
                }
            },
        };
        let index = self.index()?;
        self.control
            .reply_pairing(index, reply)
            .await
            .map_err(|e| CaseError::failed(format!("pairing reply: {e}")))
    }

    /// Release everything the case registered: watches first, so nothing can
    /// fire afterwards, then subscriptions and sockets.
    pub fn teardown(&mut self) {
        let watches = self.watches.cancel_all();
        self.peer_events = None;
        self.commands = None;
        self.pairing = None;
        self.hooks = SelectAll::new();
        self.guards.clear();
        let sockets: Vec<SocketId> = self.open.drain(..).collect();
        for sk in &sockets {
            self.sockets.close(*sk);
        }
        if watches > 0 {
            debug!(case = %self.name, watches, "pending watches cancelled");
        }
        debug!(case = %self.name, sockets = sockets.len(), "context released");
    }
}

async fn recv<T>(rx: &mut Option<UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

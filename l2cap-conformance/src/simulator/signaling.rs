//! Signalling channel of the simulated links.
//!
//! Requests the local stack sends are answered by the emulated peer unless a
//! hook diverts the signalling channel, in which case whoever holds the hook
//! plays the peer and its raw responses come back through
//! [`World::peer_signal`]. Requests the peer sends are answered by the local
//! stack and reported as [`PeerEvent::SignalResponse`].

use bytes::{BufMut, Bytes, BytesMut};
use l2cap_core::signal::{
    signaling_cid, CID_DYN_START, CID_LE_DYN_END, CMD_REJECT, CONFIG_REQ, CONFIG_RSP, CONN_REQ,
    CONN_RSP, CR_BAD_PSM, CR_LE_AUTHORIZATION, CR_LE_BAD_PSM, CR_LE_INVALID_SCID, CR_PEND,
    CR_SEC_BLOCK, CR_SUCCESS, DISCONN_REQ, DISCONN_RSP, ECRED_CONN_REQ, ECRED_CONN_RSP,
    LE_CONN_REQ, LE_CONN_RSP, REJ_INVALID_CID, REJ_NOT_UNDERSTOOD,
};
use l2cap_core::{AddressType, ChannelMode, Errno};
use l2cap_stream::CreditWindow;
use l2cap_transport::{PeerEvent, SockAddr, SocketId};
use tracing::{debug, trace, warn};

use super::socket::{Channel, SockState};
use super::world::{
    fixed_channel, HeldBatch, Request, World, LOCAL_LE_CREDITS, LOCAL_LE_MPS, LOCAL_MTU,
};

const CR_LE_AUTHENTICATION: u16 = 0x0005;
const CR_LE_ENCRYPTION_KEY_SIZE: u16 = 0x0008;

/// Most channels one enhanced credit based request may open.
const ECRED_MAX_CHANNELS: usize = 5;

/// A decoded signalling PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pdu {
    pub code: u8,
    pub ident: u8,
    pub payload: Bytes,
}

pub(crate) fn encode(code: u8, ident: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u8(code);
    buf.put_u8(ident);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    buf.freeze()
}

/// `None` for a PDU too short for its header or its declared length.
pub(crate) fn decode(data: &[u8]) -> Option<Pdu> {
    let (&code, rest) = data.split_first()?;
    let (&ident, rest) = rest.split_first()?;
    let len = usize::from(le16(rest, 0)?);
    let payload = rest.get(2..2 + len)?;
    Some(Pdu { code, ident, payload: Bytes::copy_from_slice(payload) })
}

pub(crate) fn le16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn is_response(code: u8) -> bool {
    matches!(code, CMD_REJECT | CONN_RSP | CONFIG_RSP | DISCONN_RSP | LE_CONN_RSP | ECRED_CONN_RSP)
}

fn fields(values: &[u16]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(values.len() * 2);
    for value in values {
        buf.put_u16_le(*value);
    }
    buf
}

fn command_reject(reason: u16, data: &[u8]) -> (u8, Bytes) {
    let mut buf = fields(&[reason]);
    buf.put_slice(data);
    (CMD_REJECT, buf.freeze())
}

fn ecred_rsp(result: u16, dcids: &[u16]) -> (u8, Bytes) {
    let params = if result == CR_SUCCESS || dcids.is_empty() {
        [LOCAL_MTU, LOCAL_LE_MPS, LOCAL_LE_CREDITS]
    } else {
        [0, 0, 0]
    };
    let mut buf = fields(&params);
    buf.put_u16_le(result);
    for dcid in dcids {
        buf.put_u16_le(*dcid);
    }
    (ECRED_CONN_RSP, buf.freeze())
}

fn le_conn_rsp(dcid: u16, result: u16) -> (u8, Bytes) {
    let rsp = match result {
        CR_SUCCESS | CR_LE_AUTHORIZATION => {
            fields(&[dcid, LOCAL_MTU, LOCAL_LE_MPS, LOCAL_LE_CREDITS, result])
        }
        _ => fields(&[0, 0, 0, 0, result]),
    };
    (LE_CONN_RSP, rsp.freeze())
}

fn conn_rsp(dcid: u16, scid: u16, result: u16) -> (u8, Bytes) {
    (CONN_RSP, fields(&[dcid, scid, result, 0]).freeze())
}

/// Errno a refused outgoing channel reports.
fn refusal(le: bool, result: Option<u16>) -> Errno {
    match result {
        Some(CR_SEC_BLOCK) if !le => Errno::EACCES,
        Some(CR_LE_AUTHENTICATION..=CR_LE_ENCRYPTION_KEY_SIZE) if le => Errno::EACCES,
        _ => Errno::ECONNREFUSED,
    }
}

fn valid_le_scid(scid: u16) -> bool {
    (CID_DYN_START..=CID_LE_DYN_END).contains(&scid)
}

impl World {
    /// Request channels for sockets whose link is up and secure enough.
    /// Enhanced credit based sockets to the same PSM share one request.
    pub(crate) fn send_requests(&mut self, handle: u16, sockets: Vec<SocketId>) {
        let Some(le) = self.link(handle).map(|l| l.le) else {
            return;
        };
        let mut batches: Vec<(u16, Vec<SocketId>)> = Vec::new();
        for sk in sockets {
            let Some(socket) = self.sockets.get(&sk).filter(|s| s.is_connecting()) else {
                continue;
            };
            let Some(remote) = socket.remote else {
                continue;
            };
            if remote.psm == 0 {
                self.establish(sk, fixed_channel(handle, remote.cid));
                continue;
            }
            if le && socket.mode == ChannelMode::ExtFlowctl {
                match batches.iter_mut().find(|(psm, _)| *psm == remote.psm) {
                    Some((_, batch)) => batch.push(sk),
                    None => batches.push((remote.psm, vec![sk])),
                }
                continue;
            }
            let Some(link) = self.link_mut(handle) else {
                return;
            };
            let scid = link.alloc_local_cid();
            let (code, payload) = if le {
                let local = [remote.psm, scid, LOCAL_MTU, LOCAL_LE_MPS, LOCAL_LE_CREDITS];
                (LE_CONN_REQ, fields(&local))
            } else {
                (CONN_REQ, fields(&[remote.psm, scid]))
            };
            let request = Request { psm: remote.psm, targets: vec![(sk, scid)] };
            self.send_request(handle, code, request, &payload);
        }

        for (psm, batch) in batches {
            for chunk in batch.chunks(ECRED_MAX_CHANNELS) {
                let Some(link) = self.link_mut(handle) else {
                    return;
                };
                let targets: Vec<(SocketId, u16)> =
                    chunk.iter().map(|sk| (*sk, link.alloc_local_cid())).collect();
                let mut payload = fields(&[psm, LOCAL_MTU, LOCAL_LE_MPS, LOCAL_LE_CREDITS]);
                for (_, scid) in &targets {
                    payload.put_u16_le(*scid);
                }
                self.send_request(handle, ECRED_CONN_REQ, Request { psm, targets }, &payload);
            }
        }
    }

    fn send_request(&mut self, handle: u16, code: u8, request: Request, payload: &[u8]) {
        let Some(link) = self.link_mut(handle) else {
            return;
        };
        let ident = link.next_ident();
        let le = link.le;
        debug!(
            handle,
            ident,
            code = format_args!("0x{code:02x}"),
            psm = request.psm,
            "signalling request"
        );
        link.requests.insert(ident, request);
        let pdu = encode(code, ident, payload);
        if self.subs.hook(handle, signaling_cid(le), &pdu) {
            trace!(handle, ident, "request diverted to hook");
            return;
        }
        if let Some((rsp_code, rsp)) = self.peer_answer(handle, code, payload) {
            self.handle_response(handle, rsp_code, ident, &rsp);
        }
    }

    /// How the emulated peer answers a request from the local stack.
    fn peer_answer(&mut self, handle: u16, code: u8, payload: &[u8]) -> Option<(u8, Bytes)> {
        let psm = le16(payload, 0)?;
        match code {
            CONN_REQ => {
                let scid = le16(payload, 2)?;
                if !self.peer.servers.contains_key(&psm) {
                    return Some(conn_rsp(0, scid, CR_BAD_PSM));
                }
                let dcid = self.link_mut(handle)?.alloc_peer_cid();
                Some(conn_rsp(dcid, scid, CR_SUCCESS))
            }
            LE_CONN_REQ => {
                let Some(credits) = self.peer.credits_for(psm) else {
                    return Some((LE_CONN_RSP, fields(&[0, 0, 0, 0, CR_LE_BAD_PSM]).freeze()));
                };
                let dcid = self.link_mut(handle)?.alloc_peer_cid();
                let rsp = fields(&[dcid, credits.mtu, credits.mps, credits.credits, CR_SUCCESS]);
                Some((LE_CONN_RSP, rsp.freeze()))
            }
            ECRED_CONN_REQ => {
                let scids = payload.len().saturating_sub(8) / 2;
                let Some(credits) = self.peer.credits_for(psm) else {
                    let mut rsp = fields(&[0, 0, 0, CR_LE_BAD_PSM]);
                    rsp.put_bytes(0, scids * 2);
                    return Some((ECRED_CONN_RSP, rsp.freeze()));
                };
                let link = self.link_mut(handle)?;
                let mut rsp = fields(&[credits.mtu, credits.mps, credits.credits, CR_SUCCESS]);
                for _ in 0..scids {
                    rsp.put_u16_le(link.alloc_peer_cid());
                }
                Some((ECRED_CONN_RSP, rsp.freeze()))
            }
            _ => None,
        }
    }

    /// A response to one of the local stack's requests.
    fn handle_response(&mut self, handle: u16, code: u8, ident: u8, payload: &[u8]) {
        let Some(link) = self.link_mut(handle) else {
            return;
        };
        if code == CONN_RSP && le16(payload, 4) == Some(CR_PEND) {
            trace!(handle, ident, "connection pending");
            return;
        }
        let Some(Request { psm, targets }) = link.requests.remove(&ident) else {
            debug!(handle, ident, code = format_args!("0x{code:02x}"), "unsolicited response");
            return;
        };
        trace!(
            handle,
            ident,
            code = format_args!("0x{code:02x}"),
            len = payload.len(),
            "signalling response"
        );
        match code {
            CONN_RSP => {
                let dcid = le16(payload, 0).filter(|dcid| *dcid != 0);
                let result = le16(payload, 4);
                for (sk, scid) in targets {
                    match dcid.filter(|_| result == Some(CR_SUCCESS)) {
                        Some(dcid) => self.establish(sk, basic_channel(handle, scid, dcid, psm)),
                        None => self.fail_connect(sk, refusal(false, result)),
                    }
                }
            }
            LE_CONN_RSP => {
                let result = le16(payload, 8);
                let channel = (result == Some(CR_SUCCESS))
                    .then(|| {
                        let dcid = le16(payload, 0)?;
                        Some((dcid, le16(payload, 2)?, le16(payload, 4)?, le16(payload, 6)?))
                    })
                    .flatten();
                for (sk, scid) in targets {
                    match channel {
                        Some((dcid, mtu, mps, credits)) => {
                            let negotiated = (mtu, mps, credits);
                            self.establish(sk, credit_channel(handle, scid, dcid, psm, negotiated))
                        }
                        None => self.fail_connect(sk, refusal(true, result)),
                    }
                }
            }
            ECRED_CONN_RSP => {
                let params = (le16(payload, 0), le16(payload, 2), le16(payload, 4));
                let result = le16(payload, 6);
                for (i, (sk, scid)) in targets.into_iter().enumerate() {
                    let dcid = le16(payload, 8 + 2 * i).filter(|dcid| *dcid != 0);
                    match (dcid, params) {
                        (Some(dcid), (Some(mtu), Some(mps), Some(credits))) => {
                            let negotiated = (mtu, mps, credits);
                            self.establish(sk, credit_channel(handle, scid, dcid, psm, negotiated))
                        }
                        _ => self.fail_connect(sk, refusal(true, result)),
                    }
                }
            }
            CMD_REJECT => {
                debug!(handle, ident, reason = ?le16(payload, 0), "request rejected");
                for (sk, _) in targets {
                    self.fail_connect(sk, Errno::ECONNREFUSED);
                }
            }
            _ => {
                warn!(
                    handle,
                    ident,
                    code = format_args!("0x{code:02x}"),
                    "response does not answer a request"
                );
                for (sk, _) in targets {
                    self.fail_connect(sk, Errno::ECONNREFUSED);
                }
            }
        }
    }

    /// Raw signalling data the peer sent on link `handle`.
    pub(crate) fn peer_signal(&mut self, handle: u16, data: &[u8]) {
        let Some(pdu) = decode(data) else {
            debug!(handle, len = data.len(), "malformed signalling PDU dropped");
            return;
        };
        if is_response(pdu.code) {
            self.handle_response(handle, pdu.code, pdu.ident, &pdu.payload);
        } else {
            self.peer_request(handle, pdu.code, pdu.ident, &pdu.payload);
        }
    }

    /// A request from the peer; the local stack's answer is reported to the
    /// peer's subscribers.
    pub(crate) fn peer_request(&mut self, handle: u16, code: u8, ident: u8, payload: &[u8]) {
        debug!(
            handle,
            ident,
            code = format_args!("0x{code:02x}"),
            len = payload.len(),
            "request from peer"
        );
        let answer = match code {
            CONN_REQ => self.incoming_bredr(handle, payload),
            LE_CONN_REQ => self.incoming_le(handle, payload),
            ECRED_CONN_REQ => self.incoming_ecred(handle, payload),
            DISCONN_REQ => Some(self.peer_disconnect(handle, payload)),
            CONFIG_REQ => Some(self.peer_configure(handle, payload)),
            _ => Some(command_reject(REJ_NOT_UNDERSTOOD, &[])),
        };
        match answer {
            Some((code, rsp)) => self.respond(handle, code, rsp),
            None => trace!(handle, ident, "response held"),
        }
    }

    fn respond(&mut self, handle: u16, code: u8, payload: Bytes) {
        self.subs.peer_event(PeerEvent::SignalResponse { handle, code, payload });
    }

    fn announce(&mut self, channel: &Channel) {
        self.subs.peer_event(PeerEvent::ChannelConnected {
            handle: channel.handle,
            psm: channel.psm,
            peer_cid: channel.peer_cid,
            local_cid: channel.local_cid,
        });
    }

    fn peer_sockaddr(&self, handle: u16, psm: u16, cid: u16) -> Option<SockAddr> {
        let link = self.link(handle)?;
        let addr_type = if link.le { AddressType::LePublic } else { AddressType::BrEdr };
        Some(SockAddr { bdaddr: link.peer, addr_type, psm, cid })
    }

    /// Listener for `psm` plus whether the link meets its security level.
    fn listener_for(&self, handle: u16, le: bool, psm: u16) -> Option<(SocketId, bool, bool)> {
        let listener = self.find_listener(le, psm)?;
        let socket = self.sockets.get(&listener)?;
        let link = self.link(handle)?;
        let secure = link.security >= self.effective_security(socket.security, psm, le);
        Some((listener, secure, socket.defer_setup))
    }

    fn incoming_bredr(&mut self, handle: u16, payload: &[u8]) -> Option<(u8, Bytes)> {
        let (Some(psm), Some(scid)) = (le16(payload, 0), le16(payload, 2)) else {
            return Some(command_reject(REJ_NOT_UNDERSTOOD, &[]));
        };
        let Some((listener, secure, held)) = self.listener_for(handle, false, psm) else {
            debug!(handle, psm, "no listener");
            return Some(conn_rsp(0, scid, CR_BAD_PSM));
        };
        if !secure {
            debug!(handle, psm, "link security too low");
            return Some(conn_rsp(0, scid, CR_SEC_BLOCK));
        }
        let dcid = self.link_mut(handle)?.alloc_local_cid();
        let channel = basic_channel(handle, dcid, scid, psm);
        let remote = self.peer_sockaddr(handle, psm, scid)?;
        let child = self.add_child(listener, remote, channel.clone(), held)?;
        if held {
            self.hold(handle, CONN_REQ, vec![child], vec![scid]);
            return None;
        }
        self.announce(&channel);
        Some(conn_rsp(dcid, scid, CR_SUCCESS))
    }

    fn incoming_le(&mut self, handle: u16, payload: &[u8]) -> Option<(u8, Bytes)> {
        let (Some(psm), Some(scid), Some(mtu), Some(mps), Some(credits)) = (
            le16(payload, 0),
            le16(payload, 2),
            le16(payload, 4),
            le16(payload, 6),
            le16(payload, 8),
        ) else {
            return Some(command_reject(REJ_NOT_UNDERSTOOD, &[]));
        };
        let Some((listener, secure, held)) = self.listener_for(handle, true, psm) else {
            return Some(le_conn_rsp(0, CR_LE_BAD_PSM));
        };
        if !valid_le_scid(scid) {
            return Some(le_conn_rsp(0, CR_LE_INVALID_SCID));
        }
        if !secure {
            return Some(le_conn_rsp(0, CR_LE_AUTHENTICATION));
        }
        let dcid = self.link_mut(handle)?.alloc_local_cid();
        let channel = credit_channel(handle, dcid, scid, psm, (mtu, mps, credits));
        let remote = self.peer_sockaddr(handle, psm, scid)?;
        let child = self.add_child(listener, remote, channel.clone(), held)?;
        if held {
            self.hold(handle, LE_CONN_REQ, vec![child], vec![scid]);
            return None;
        }
        self.announce(&channel);
        Some(le_conn_rsp(dcid, CR_SUCCESS))
    }

    fn incoming_ecred(&mut self, handle: u16, payload: &[u8]) -> Option<(u8, Bytes)> {
        let (Some(psm), Some(mtu), Some(mps), Some(credits)) =
            (le16(payload, 0), le16(payload, 2), le16(payload, 4), le16(payload, 6))
        else {
            return Some(command_reject(REJ_NOT_UNDERSTOOD, &[]));
        };
        let scids: Vec<u16> =
            payload[8..].chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        if scids.is_empty() || scids.len() > ECRED_MAX_CHANNELS || payload.len() % 2 != 0 {
            return Some(command_reject(REJ_NOT_UNDERSTOOD, &[]));
        }
        let refused = vec![0; scids.len()];
        let Some((listener, secure, held)) = self.listener_for(handle, true, psm) else {
            return Some(ecred_rsp(CR_LE_BAD_PSM, &refused));
        };
        if !scids.iter().copied().all(valid_le_scid) {
            return Some(ecred_rsp(CR_LE_INVALID_SCID, &refused));
        }
        if !secure {
            return Some(ecred_rsp(CR_LE_AUTHENTICATION, &refused));
        }

        let mut children = Vec::with_capacity(scids.len());
        let mut channels = Vec::with_capacity(scids.len());
        for scid in &scids {
            let dcid = self.link_mut(handle)?.alloc_local_cid();
            let channel = credit_channel(handle, dcid, *scid, psm, (mtu, mps, credits));
            let remote = self.peer_sockaddr(handle, psm, *scid)?;
            children.push(self.add_child(listener, remote, channel.clone(), held)?);
            channels.push(channel);
        }
        if held {
            self.hold(handle, ECRED_CONN_REQ, children, scids);
            return None;
        }
        for channel in &channels {
            self.announce(channel);
        }
        let dcids: Vec<u16> = channels.iter().map(|c| c.local_cid).collect();
        Some(ecred_rsp(CR_SUCCESS, &dcids))
    }

    fn hold(&mut self, handle: u16, code: u8, children: Vec<SocketId>, scids: Vec<u16>) {
        debug!(handle, channels = children.len(), "channels held for authorisation");
        self.held.push(HeldBatch { handle, code, children, scids, authorized: Vec::new() });
    }

    /// Find the local end `dcid` on link `handle`.
    fn local_channel(&self, handle: u16, dcid: u16) -> Option<SocketId> {
        self.sockets
            .iter()
            .filter(|(_, s)| matches!(s.state, SockState::Connected | SockState::Deferred))
            .find(|(_, s)| {
                s.channel.as_ref().is_some_and(|c| c.handle == handle && c.local_cid == dcid)
            })
            .map(|(id, _)| *id)
    }

    fn peer_disconnect(&mut self, handle: u16, payload: &[u8]) -> (u8, Bytes) {
        let (Some(dcid), Some(scid)) = (le16(payload, 0), le16(payload, 2)) else {
            return command_reject(REJ_NOT_UNDERSTOOD, &[]);
        };
        let Some(sk) = self.local_channel(handle, dcid) else {
            debug!(handle, dcid, "disconnect for unknown channel");
            return command_reject(REJ_INVALID_CID, &payload[..4]);
        };
        if let Some(socket) = self.sockets.get_mut(&sk) {
            socket.state = SockState::Closed;
            socket.write_shut = true;
        }
        debug!(%sk, handle, dcid, "channel disconnected by peer");
        (DISCONN_RSP, fields(&[dcid, scid]).freeze())
    }

    fn peer_configure(&mut self, handle: u16, payload: &[u8]) -> (u8, Bytes) {
        let Some(dcid) = le16(payload, 0).filter(|_| payload.len() >= 4) else {
            return command_reject(REJ_NOT_UNDERSTOOD, &[]);
        };
        let peer_cid = self
            .local_channel(handle, dcid)
            .and_then(|sk| self.sockets.get(&sk))
            .and_then(|s| s.channel.as_ref())
            .map(|c| c.peer_cid);
        match peer_cid {
            Some(peer_cid) => (CONFIG_RSP, fields(&[peer_cid, 0, 0]).freeze()),
            None => {
                debug!(handle, dcid, "configuration for unknown channel");
                command_reject(REJ_INVALID_CID, &payload[..4])
            }
        }
    }

    /// The application read from a held channel: it is authorised. The peer
    /// gets its response once every channel of the request is.
    pub(crate) fn authorize(&mut self, sk: SocketId) {
        if let Some(socket) = self.sockets.get_mut(&sk) {
            socket.state = SockState::Connected;
        }
        let Some(pos) = self.held.iter().position(|b| b.children.contains(&sk)) else {
            return;
        };
        let batch = &mut self.held[pos];
        if !batch.authorized.contains(&sk) {
            batch.authorized.push(sk);
        }
        if batch.authorized.len() < batch.children.len() {
            let waiting = batch.children.len() - batch.authorized.len();
            trace!(%sk, waiting, "channel authorised");
            return;
        }
        let batch = self.held.remove(pos);
        let channels: Vec<Channel> = batch
            .children
            .iter()
            .filter_map(|child| self.sockets.get(child).and_then(|s| s.channel.clone()))
            .collect();
        for channel in &channels {
            self.announce(channel);
        }
        let dcids: Vec<u16> = channels.iter().map(|c| c.local_cid).collect();
        let scid = batch.scids.first().copied().unwrap_or(0);
        let (code, rsp) = match batch.code {
            CONN_REQ => conn_rsp(dcids.first().copied().unwrap_or(0), scid, CR_SUCCESS),
            LE_CONN_REQ => le_conn_rsp(dcids.first().copied().unwrap_or(0), CR_SUCCESS),
            _ => ecred_rsp(CR_SUCCESS, &dcids),
        };
        debug!(handle = batch.handle, channels = dcids.len(), "held channels accepted");
        self.respond(batch.handle, code, rsp);
    }

    /// A held channel was closed without being authorised: the whole
    /// request is refused.
    pub(crate) fn reject_held(&mut self, sk: SocketId) {
        let Some(pos) = self.held.iter().position(|b| b.children.contains(&sk)) else {
            return;
        };
        let batch = self.held.remove(pos);
        for child in batch.children.iter().filter(|child| **child != sk) {
            self.discard(*child);
        }
        let scid = batch.scids.first().copied().unwrap_or(0);
        let (code, rsp) = match batch.code {
            CONN_REQ => conn_rsp(0, scid, CR_SEC_BLOCK),
            LE_CONN_REQ => le_conn_rsp(0, CR_LE_AUTHORIZATION),
            _ => ecred_rsp(CR_LE_AUTHORIZATION, &[]),
        };
        debug!(handle = batch.handle, channels = batch.children.len(), "held channels rejected");
        self.respond(batch.handle, code, rsp);
    }
}

fn basic_channel(handle: u16, local_cid: u16, peer_cid: u16, psm: u16) -> Channel {
    Channel {
        handle,
        local_cid,
        peer_cid,
        psm,
        imtu: LOCAL_MTU,
        omtu: LOCAL_MTU,
        mps: 0,
        credits: None,
    }
}

/// `(mtu, mps, credits)` as the remote end announced them.
fn credit_channel(
    handle: u16,
    local_cid: u16,
    peer_cid: u16,
    psm: u16,
    remote: (u16, u16, u16),
) -> Channel {
    let (mtu, mps, credits) = remote;
    Channel {
        handle,
        local_cid,
        peer_cid,
        psm,
        imtu: LOCAL_MTU,
        omtu: mtu,
        mps,
        credits: Some(CreditWindow::new(credits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdu_layout() {
        let pdu = encode(CONN_REQ, 3, &[0x01, 0x10, 0x41, 0x00]);
        assert_eq!(&pdu[..], &[0x02, 0x03, 0x04, 0x00, 0x01, 0x10, 0x41, 0x00]);
        let decoded = decode(&pdu).unwrap();
        assert_eq!(decoded.code, CONN_REQ);
        assert_eq!(decoded.ident, 3);
        assert_eq!(le16(&decoded.payload, 2), Some(0x0041));
    }

    #[test]
    fn truncated_pdu_is_rejected() {
        assert!(decode(&[0x01, 0x01, 0x04, 0x00, 0x00]).is_none());
        assert!(decode(&[0x01]).is_none());
    }

    #[test]
    fn command_reject_carries_reason() {
        let (code, rsp) = command_reject(REJ_INVALID_CID, &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(code, CMD_REJECT);
        assert_eq!(&rsp[..], &[0x02, 0x00, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn refusal_errnos() {
        assert_eq!(refusal(false, Some(CR_SEC_BLOCK)), Errno::EACCES);
        assert_eq!(refusal(false, Some(CR_BAD_PSM)), Errno::ECONNREFUSED);
        assert_eq!(refusal(true, Some(CR_LE_AUTHORIZATION)), Errno::EACCES);
        assert_eq!(refusal(true, Some(CR_LE_BAD_PSM)), Errno::ECONNREFUSED);
        assert_eq!(refusal(true, None), Errno::ECONNREFUSED);
    }

    #[test]
    fn rejected_ecred_keeps_local_parameters_without_channels() {
        let (_, rsp) = ecred_rsp(CR_LE_AUTHORIZATION, &[]);
        assert_eq!(&rsp[..], &[0xa0, 0x02, 0xbc, 0x00, 0x04, 0x00, 0x06, 0x00]);
        let (_, rsp) = ecred_rsp(CR_LE_INVALID_SCID, &[0]);
        assert_eq!(&rsp[..], &[0, 0, 0, 0, 0, 0, 0x09, 0x00, 0, 0]);
    }
}

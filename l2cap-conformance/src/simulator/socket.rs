//! State of one simulated local socket.

use bytes::Bytes;
use l2cap_core::{ChannelMode, Errno, SecurityLevel, SocketKind, TimestampFlags};
use l2cap_stream::{CreditWindow, TimestampKind, TxTimestamp};
use l2cap_transport::{Readiness, SockAddr, SocketId};
use std::collections::VecDeque;
use std::time::Duration;

/// Default `SO_SNDBUF`.
pub(crate) const DEFAULT_SEND_BUFFER: usize = 16 * 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum SockState {
    Open,
    Listening,
    /// Connect issued; `requested` once a signalling request is out or the
    /// socket waits on pairing.
    Connecting { requested: bool },
    /// Incoming channel held until the application authorises it.
    Deferred,
    Connected,
    Closed,
}

/// An established (or held) channel.
#[derive(Debug, Clone)]
pub(crate) struct Channel {
    pub handle: u16,
    pub local_cid: u16,
    pub peer_cid: u16,
    pub psm: u16,
    pub imtu: u16,
    pub omtu: u16,
    /// Peer MPS; frames are cut to it on credit based channels.
    pub mps: u16,
    /// Transmit credits on LE credit based channels.
    pub credits: Option<CreditWindow>,
}

#[derive(Debug)]
pub(crate) struct SimSocket {
    pub kind: SocketKind,
    pub local: Option<SockAddr>,
    pub remote: Option<SockAddr>,
    pub security: SecurityLevel,
    pub mode: ChannelMode,
    pub defer_setup: bool,
    pub send_timeout: Option<Duration>,
    pub timestamping: TimestampFlags,
    pub send_buffer: usize,
    pub state: SockState,
    /// A connect was issued; a concluded attempt reports write readiness.
    pub connect_attempted: bool,
    pub write_shut: bool,
    pub error: Option<Errno>,
    pub channel: Option<Channel>,
    pub parent: Option<SocketId>,
    pub accept_queue: VecDeque<SocketId>,
    pub rx: VecDeque<(Bytes, Option<Duration>)>,
    pub errqueue: VecDeque<TxTimestamp>,
    /// SDUs waiting for transmit credits, with their timestamp keys.
    pub tx_queue: VecDeque<(Bytes, u32)>,
    tx_sends: u32,
    tx_bytes: u32,
}

impl SimSocket {
    pub(crate) fn new(kind: SocketKind) -> Self {
        Self {
            kind,
            local: None,
            remote: None,
            security: SecurityLevel::Low,
            mode: ChannelMode::Basic,
            defer_setup: false,
            send_timeout: None,
            timestamping: TimestampFlags::empty(),
            send_buffer: DEFAULT_SEND_BUFFER,
            state: SockState::Open,
            connect_attempted: false,
            write_shut: false,
            error: None,
            channel: None,
            parent: None,
            accept_queue: VecDeque::new(),
            rx: VecDeque::new(),
            errqueue: VecDeque::new(),
            tx_queue: VecDeque::new(),
            tx_sends: 0,
            tx_bytes: 0,
        }
    }

    /// A child created by a listener for an incoming channel.
    pub(crate) fn child_of(
        listener: &SimSocket,
        parent: SocketId,
        remote: SockAddr,
        channel: Channel,
        held: bool,
    ) -> Self {
        let mut child = Self::new(listener.kind);
        child.local = listener.local;
        child.remote = Some(remote);
        child.security = listener.security;
        child.mode = listener.mode;
        child.parent = Some(parent);
        child.channel = Some(channel);
        child.state = if held { SockState::Deferred } else { SockState::Connected };
        child
    }

    pub(crate) fn is_connecting(&self) -> bool {
        matches!(self.state, SockState::Connecting { .. })
    }

    pub(crate) fn is_le(&self) -> bool {
        self.local.or(self.remote).is_some_and(|a| a.addr_type.is_le())
    }

    pub(crate) fn readiness(&self) -> Readiness {
        let mut ready = Readiness::empty();
        match self.state {
            SockState::Connected => {
                if !self.rx.is_empty() {
                    ready |= Readiness::READABLE;
                }
                if !self.write_shut {
                    ready |= Readiness::WRITABLE;
                }
            }
            SockState::Listening if !self.accept_queue.is_empty() => ready |= Readiness::READABLE,
            SockState::Closed => {
                ready |= Readiness::READABLE | Readiness::HANGUP;
                if self.connect_attempted {
                    ready |= Readiness::WRITABLE;
                }
            }
            _ => {}
        }
        if self.error.is_some() || !self.errqueue.is_empty() {
            ready |= Readiness::ERROR;
        }
        ready
    }

    /// Conclude a connect attempt, latching `error` when there is one.
    pub(crate) fn conclude(&mut self, error: Option<Errno>) {
        self.state = SockState::Closed;
        self.error = error;
        self.connect_attempted = true;
        self.tx_queue.clear();
    }

    /// Restart report numbering, as enabling `SO_TIMESTAMPING` does.
    pub(crate) fn set_timestamping(&mut self, flags: TimestampFlags) {
        self.timestamping = flags;
        self.tx_sends = 0;
        self.tx_bytes = 0;
    }

    /// Key of the next transmit unit: the send index for message sockets, the
    /// offset of the last byte for stream sockets.
    pub(crate) fn next_tx_key(&mut self, len: usize) -> u32 {
        match self.kind {
            SocketKind::DatagramSeq => {
                let key = self.tx_sends;
                self.tx_sends = self.tx_sends.wrapping_add(1);
                key
            }
            SocketKind::Stream => {
                self.tx_bytes = self.tx_bytes.wrapping_add(len as u32);
                self.tx_bytes.wrapping_sub(1)
            }
        }
    }

    /// Queue a transmit report when `flag` is enabled.
    pub(crate) fn report(&mut self, flag: TimestampFlags, key: u32, kind: TimestampKind) {
        if self.timestamping.contains(flag) {
            self.errqueue.push_back(TxTimestamp { key, kind });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_connect_reports_everything() {
        let mut sk = SimSocket::new(SocketKind::DatagramSeq);
        sk.state = SockState::Connecting { requested: false };
        assert!(sk.readiness().is_empty());
        sk.conclude(Some(Errno::ECONNREFUSED));
        assert_eq!(
            sk.readiness(),
            Readiness::READABLE | Readiness::WRITABLE | Readiness::HANGUP | Readiness::ERROR
        );
    }

    #[test]
    fn aborted_connect_carries_no_error() {
        let mut sk = SimSocket::new(SocketKind::DatagramSeq);
        sk.conclude(None);
        assert!(!sk.readiness().contains(Readiness::ERROR));
        assert!(sk.readiness().contains(Readiness::HANGUP));
    }

    #[test]
    fn stream_keys_track_last_byte() {
        let mut sk = SimSocket::new(SocketKind::Stream);
        assert_eq!(sk.next_tx_key(8), 7);
        assert_eq!(sk.next_tx_key(8), 15);
        sk.set_timestamping(TimestampFlags::OPT_ID);
        assert_eq!(sk.next_tx_key(4), 3);
    }

    #[test]
    fn datagram_keys_count_sends() {
        let mut sk = SimSocket::new(SocketKind::DatagramSeq);
        assert_eq!(sk.next_tx_key(100), 0);
        assert_eq!(sk.next_tx_key(1), 1);
    }

    #[test]
    fn reports_follow_flags() {
        let mut sk = SimSocket::new(SocketKind::DatagramSeq);
        sk.set_timestamping(TimestampFlags::TX_SOFTWARE);
        sk.report(TimestampFlags::TX_SOFTWARE, 0, TimestampKind::Software);
        sk.report(TimestampFlags::TX_COMPLETION, 0, TimestampKind::Completion);
        assert_eq!(sk.errqueue.len(), 1);
        assert!(sk.readiness().contains(Readiness::ERROR));
    }
}

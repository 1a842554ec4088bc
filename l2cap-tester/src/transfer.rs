#![forbid(unsafe_code)]

//! Data phase of a connected channel.
//!
//! Inbound, the peer writes the reference payload in fragments of the local
//! receive MTU and the local socket reads until the reassembled buffer
//! matches. Outbound, the local socket writes the payload `repeat_count + 1`
//! times in fragments of the send MTU and the peer-side hook reassembles it.
//! With transmit timestamping on, every send also owes a sequence of reports
//! on the socket error queue; the transfer completes once both the data and
//! the reports are accounted for.

use bytes::Bytes;
use l2cap_core::{CaseError, Errno};
use l2cap_stream::{fragments, TimestampVerifier, TransferProgress, TransferVerifier};
use l2cap_transport::{ChannelOptions, Readiness, SocketId};
use tracing::{debug, trace, warn};

use crate::context::{Event, TestContext};

/// Size of a single receive; larger than any MTU the catalogue negotiates.
const RECV_BUFFER: usize = 1024;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Step {
    /// The event belongs to something else.
    Ignored,
    Progress,
    Complete,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Direction {
    Inbound,
    Outbound { peer_cid: u16 },
}

pub struct TransferSession {
    socket: SocketId,
    direction: Direction,
    data: TransferVerifier,
    timestamps: Option<TimestampVerifier>,
    rx_timestamps: bool,
    recv_len: usize,
}

impl TransferSession {
    /// Have the peer send the inbound payload to `sk`.
    pub fn start_inbound(
        ctx: &mut TestContext,
        sk: SocketId,
        mtu: ChannelOptions,
    ) -> Result<Self, CaseError> {
        let params = ctx.params();
        let payload = params
            .inbound()
            .cloned()
            .ok_or_else(|| CaseError::failed("no inbound payload"))?;
        let flags = params.timestamping_flags;
        if flags.records_rx() {
            ctx.driver().enable_timestamping(sk, flags)?;
        }
        let handle = ctx.link.handle.ok_or_else(|| CaseError::failed("no link to the peer"))?;
        let cid = ctx
            .link
            .local_cid
            .ok_or_else(|| CaseError::failed("peer reported no channel"))?;

        ctx.watch(sk, Readiness::READABLE);
        let peer = ctx.peer();
        let mut sent = 0;
        let chunks = fragments(&payload, usize::from(mtu.imtu))
            .map_err(|e| CaseError::failed(e.to_string()))?;
        for chunk in chunks {
            peer.send_cid(handle, cid, chunk)
                .map_err(|e| CaseError::from_errno("peer send", e))?;
            sent += 1;
        }
        debug!(%sk, handle, cid, bytes = payload.len(), fragments = sent, "peer sending");

        Ok(Self {
            socket: sk,
            direction: Direction::Inbound,
            data: TransferVerifier::new(payload, 1),
            timestamps: None,
            rx_timestamps: flags.records_rx(),
            recv_len: RECV_BUFFER.max(usize::from(mtu.imtu)),
        })
    }

    /// Write the outbound payload through `sk`.
    pub fn start_outbound(
        ctx: &mut TestContext,
        sk: SocketId,
        mtu: ChannelOptions,
    ) -> Result<Self, CaseError> {
        let params = ctx.params();
        let payload: Bytes = params
            .outbound()
            .cloned()
            .ok_or_else(|| CaseError::failed("no outbound payload"))?;
        let sends = params.repeat_count + 1;
        let handle = ctx.link.handle.ok_or_else(|| CaseError::failed("no link to the peer"))?;
        let peer_cid = ctx
            .link
            .peer_cid
            .ok_or_else(|| CaseError::failed("peer reported no channel"))?;
        ctx.hook(Some(handle), peer_cid);

        let flags = params.timestamping_flags;
        let mut timestamps = None;
        if flags.records_tx() {
            debug!(%sk, ?flags, "enabling TX timestamping");
            ctx.driver().enable_timestamping(sk, flags)?;
            timestamps = Some(TimestampVerifier::new(flags, params.socket_kind));
            ctx.watch(sk, Readiness::ERROR);
        }

        // Nothing is flushed while the writes are queued.
        let extra = payload.len() * sends as usize;
        if let Err(err) = ctx.driver().grow_send_buffer(sk, extra) {
            warn!(%sk, %err, "could not grow send buffer");
        }

        let mut owed = 0;
        for _ in 0..sends {
            let written = ctx.driver().write_all(sk, &payload, mtu.omtu, |n| {
                if let Some(ts) = timestamps.as_mut() {
                    owed += ts.expect(n);
                }
            })?;
            if written != payload.len() {
                return Err(CaseError::failed(format!(
                    "unable to write all data: {written} != {}",
                    payload.len()
                )));
            }
        }
        debug!(%sk, sends, owed, "outbound payload written");

        Ok(Self {
            socket: sk,
            direction: Direction::Outbound { peer_cid },
            data: TransferVerifier::new(payload, sends),
            timestamps,
            rx_timestamps: false,
            recv_len: RECV_BUFFER,
        })
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    pub fn is_complete(&self) -> bool {
        self.data.is_done() && self.timestamps.as_ref().map_or(true, TimestampVerifier::is_drained)
    }

    fn step(&self) -> Step {
        if self.is_complete() {
            Step::Complete
        } else {
            Step::Progress
        }
    }

    pub fn on_event(&mut self, ctx: &mut TestContext, event: &Event) -> Result<Step, CaseError> {
        match (event, self.direction) {
            (Event::Ready(fired), Direction::Inbound)
                if fired.socket == self.socket && fired.readiness.contains(Readiness::READABLE) =>
            {
                self.drain_socket(ctx)?;
                if !self.data.is_done() {
                    ctx.watch(self.socket, Readiness::READABLE);
                }
                Ok(self.step())
            }
            (Event::Ready(fired), _)
                if fired.socket == self.socket
                    && self.timestamps.is_some()
                    && fired.readiness.contains(Readiness::ERROR) =>
            {
                self.drain_error_queue(ctx)?;
                if self.timestamps.as_ref().is_some_and(|ts| !ts.is_drained()) {
                    ctx.watch(self.socket, Readiness::ERROR);
                }
                Ok(self.step())
            }
            (Event::Hook(hook), Direction::Outbound { peer_cid }) if hook.cid == peer_cid => {
                self.accept_data(&hook.data)?;
                Ok(self.step())
            }
            _ => Ok(Step::Ignored),
        }
    }

    fn accept_data(&mut self, chunk: &[u8]) -> Result<(), CaseError> {
        match self.data.on_data(chunk).map_err(|e| CaseError::failed(e.to_string()))? {
            TransferProgress::Partial { received, expected } => trace!(received, expected, "read"),
            TransferProgress::UnitComplete { remaining } => debug!(remaining, "payload verified"),
            TransferProgress::Done => {
                debug!(fragments = self.data.fragments(), "transfer verified")
            }
        }
        Ok(())
    }

    fn drain_socket(&mut self, ctx: &TestContext) -> Result<(), CaseError> {
        let sockets = ctx.sockets();
        let mut buf = vec![0u8; self.recv_len];
        loop {
            match sockets.recv(self.socket, &mut buf) {
                Ok(received) if received.len == 0 => {
                    return Err(CaseError::failed("channel closed during transfer"));
                }
                Ok(received) => {
                    if self.rx_timestamps && received.timestamp.is_none() {
                        return Err(CaseError::failed("received data without RX timestamp"));
                    }
                    self.accept_data(&buf[..received.len])?;
                    if self.data.is_done() {
                        return Ok(());
                    }
                }
                Err(Errno::EAGAIN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CaseError::from_errno("read", e)),
            }
        }
    }

    fn drain_error_queue(&mut self, ctx: &TestContext) -> Result<(), CaseError> {
        let Some(ts) = self.timestamps.as_mut() else {
            return Ok(());
        };
        let sockets = ctx.sockets();
        loop {
            match sockets.recv_error_queue(self.socket) {
                Ok(report) => {
                    let outstanding =
                        ts.on_event(report).map_err(|e| CaseError::failed(e.to_string()))?;
                    trace!(key = report.key, kind = %report.kind, outstanding, "tx timestamp");
                }
                Err(Errno::EAGAIN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CaseError::from_errno("recvmsg(MSG_ERRQUEUE)", e)),
            }
        }
    }
}

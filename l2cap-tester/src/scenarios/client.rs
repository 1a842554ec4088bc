#![forbid(unsafe_code)]

//! Outgoing channel scenarios.

use futures::future::BoxFuture;
use l2cap_core::hci::ADV_DIRECT_IND;
use l2cap_core::signal::signaling_cid;
use l2cap_core::{
    AdvParameters, Advertising, CaseError, ChannelMode, ConnectionParameters, Errno,
};
use l2cap_stream::{SequencerAction, TwoSocketSequencer};
use l2cap_transport::{
    ConnectProgress, ErrorExpectation, HookData, PeerServer, Readiness, Shutdown, SocketId,
    SocketOption,
};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::start_transfer;
use crate::context::{Event, TestContext};
use crate::transfer::{Step, TransferSession};

pub fn connect(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_connect(ctx))
}

pub fn connect_close(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_connect_close(ctx))
}

pub fn connect_timeout(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_connect_timeout(ctx))
}

pub fn connect_reject(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_connect_reject(ctx))
}

pub fn connect_two(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_connect_two(ctx))
}

fn connect_failed(errno: Errno) -> CaseError {
    CaseError::failed(format!("can't connect socket: {} ({})", errno.desc(), errno as i32))
}

/// Open a channel socket and start connecting it to the case's peer.
fn start_connect(ctx: &mut TestContext) -> Result<SocketId, CaseError> {
    let sk = ctx.open_channel(0)?;
    let addr = ctx.peer_sockaddr();
    ctx.driver().connect(sk, addr).map_err(connect_failed)?;
    info!(%sk, "connect in progress");
    Ok(sk)
}

enum ClientState {
    Connecting,
    Transferring(TransferSession),
    /// Write side shut down; the peer must see the disconnection first.
    HalfClosed,
}

async fn run_connect(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    if let Some(psm) = params.server_service_id {
        ctx.peer().add_l2cap_server(PeerServer { psm, credits: params.credit_parameters() });
    }
    let check_adv = params.advertising == Advertising::Direct;
    if check_adv {
        ctx.subscribe_commands();
    }

    let sk = start_connect(ctx)?;
    ctx.watch(sk, Readiness::WRITABLE);

    let expect = ErrorExpectation::from_params(&params);
    let raw_cid = signaling_cid(ctx.transport().is_le());
    let mut state = ClientState::Connecting;
    loop {
        let event = ctx.next_event().await?;
        if let ClientState::Transferring(session) = &mut state {
            match session.on_event(ctx, &event)? {
                Step::Complete => return Ok(()),
                Step::Progress => continue,
                Step::Ignored => {}
            }
        }
        match event {
            Event::Command(cmd) if check_adv => {
                if let Some(adv) = cmd.adv_parameters() {
                    debug!("advertising parameters issued");
                    return check_direct_advertising(ctx, adv);
                }
            }
            Event::Hook(hook) if hook.cid == raw_cid => answer_signal(ctx, &params, &hook)?,
            Event::Ready(fired) if fired.socket == sk => match state {
                ClientState::Connecting if fired.readiness.contains(Readiness::WRITABLE) => {
                    match ctx.driver().complete_connect(sk, &expect)? {
                        ConnectProgress::Concluded => return Ok(()),
                        ConnectProgress::Established => {}
                    }
                    info!(%sk, cid = ?ctx.link.peer_cid, "connected");
                    if let Some(session) = start_transfer(ctx, sk)? {
                        state = ClientState::Transferring(session);
                    } else if params.shutdown_write {
                        ctx.watch(sk, Readiness::HANGUP);
                        ctx.sockets()
                            .shutdown(sk, Shutdown::Write)
                            .map_err(|e| CaseError::from_errno("shutdown", e))?;
                        state = ClientState::HalfClosed;
                    } else {
                        return Ok(());
                    }
                }
                ClientState::HalfClosed if fired.readiness.contains(Readiness::HANGUP) => {
                    info!(%sk, "disconnected");
                    if !ctx.link.host_disconnected {
                        warn!("hang-up received before the peer saw the disconnection");
                        return Err(CaseError::failed("hang-up before L2CAP disconnection"));
                    }
                    return ctx.driver().classify_hangup(sk, &expect);
                }
                _ => debug!(%sk, readiness = ?fired.readiness, "ignored readiness"),
            },
            _ => {}
        }
    }
}

/// Connecting while the local controller advertises must use directed
/// advertising aimed at the peer.
fn check_direct_advertising(ctx: &TestContext, adv: AdvParameters) -> Result<(), CaseError> {
    if adv.adv_type != ADV_DIRECT_IND {
        return Err(CaseError::failed(format!("invalid advertising type 0x{:02x}", adv.adv_type)));
    }
    let peer = ctx.peer().address();
    if adv.direct_addr != peer {
        return Err(CaseError::failed(format!(
            "invalid direct address {} in advertising parameters, expected {peer}",
            adv.direct_addr
        )));
    }
    Ok(())
}

/// Play the peer's side of the signalling exchange from raw bytes.
fn answer_signal(
    ctx: &mut TestContext,
    params: &ConnectionParameters,
    hook: &HookData,
) -> Result<(), CaseError> {
    debug!(handle = hook.handle, cid = hook.cid, len = hook.data.len(), "signalling PDU to peer");
    if let Some(expected) = &params.raw_expect_command {
        if hook.data != *expected {
            return Err(CaseError::failed("unexpected signalling PDU"));
        }
    }
    let Some(raw) = &params.raw_send_command else {
        return Ok(());
    };
    ctx.peer()
        .send_cid(hook.handle, hook.cid, raw)
        .map_err(|e| CaseError::from_errno("peer send", e))
}

async fn run_connect_close(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    let sk = start_connect(ctx)?;
    ctx.watch(sk, Readiness::HANGUP);
    ctx.sockets()
        .shutdown(sk, Shutdown::Both)
        .map_err(|e| CaseError::from_errno("shutdown", e))?;
    wait_hangup(ctx, sk, &ErrorExpectation::from_params(&params)).await
}

async fn run_connect_timeout(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    let sk = ctx.open_channel(0)?;
    let send_timeout = params.timeout.unwrap_or(Duration::from_secs(1));
    ctx.sockets()
        .set_option(sk, SocketOption::SendTimeout(send_timeout))
        .map_err(|e| {
            CaseError::failed(format!("can't set SO_SNDTIMEO: {} ({})", e.desc(), e as i32))
        })?;
    let addr = ctx.peer_sockaddr();
    ctx.driver().connect(sk, addr).map_err(connect_failed)?;
    ctx.watch(sk, Readiness::HANGUP);
    debug!(%sk, ?send_timeout, "waiting for the attempt to expire");
    wait_hangup(ctx, sk, &ErrorExpectation::from_params(&params)).await
}

async fn wait_hangup(
    ctx: &mut TestContext,
    sk: SocketId,
    expect: &ErrorExpectation,
) -> Result<(), CaseError> {
    loop {
        if let Event::Ready(fired) = ctx.next_event().await? {
            if fired.socket == sk && fired.readiness.contains(Readiness::HANGUP) {
                info!(%sk, "disconnected");
                return ctx.driver().classify_hangup(sk, expect);
            }
        }
    }
}

/// The local stack must refuse the connection synchronously.
async fn run_connect_reject(ctx: &mut TestContext) -> Result<(), CaseError> {
    let sk = ctx.open_channel(0).map_err(|e| CaseError::failed(e.to_string()))?;
    let addr = ctx.peer_sockaddr();
    let result = ctx.driver().connect(sk, addr);
    ctx.close_socket(sk);
    match result {
        Err(errno) => {
            debug!(%errno, "connect refused");
            Ok(())
        }
        Ok(()) => Err(CaseError::failed("connect was not rejected")),
    }
}

/// Open a socket for the two-socket scenario and start connecting it.
fn open_pending(ctx: &mut TestContext, deferred: bool) -> Result<SocketId, CaseError> {
    let sk = ctx.open_channel(0)?;
    if deferred {
        ctx.driver().set_deferred(sk)?;
    }
    let addr = ctx.peer_sockaddr();
    ctx.driver().connect(sk, addr).map_err(connect_failed)?;
    info!(%sk, deferred, "connect in progress");
    Ok(sk)
}

/// Two outgoing channels to a silent peer. The first scan enable opens the
/// second socket; the peer then advertises and both (or, with the first
/// closed, one) channels must connect.
async fn run_connect_two(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    ctx.subscribe_commands();
    if let Some(psm) = params.server_service_id {
        ctx.peer().add_l2cap_server(PeerServer { psm, credits: None });
    }

    let deferred = params.mode == ChannelMode::ExtFlowctl;
    let mut sequencer = TwoSocketSequencer::new(params.close_first);
    let first = open_pending(ctx, deferred)?;
    if !params.close_first {
        ctx.watch(first, Readiness::WRITABLE);
    }
    let mut second = None;
    let expect = ErrorExpectation::default();

    loop {
        match ctx.next_event().await? {
            Event::Command(cmd) => match sequencer.on_command(&cmd) {
                SequencerAction::OpenSecond { close_first } => {
                    let sk = open_pending(ctx, false)?;
                    ctx.watch(sk, Readiness::WRITABLE);
                    second = Some(sk);
                    if close_first {
                        info!(%first, "closing first socket");
                        ctx.close_socket(first);
                    }
                    enable_peer_advertising(ctx).await?;
                }
                SequencerAction::EnableAdvertising => enable_peer_advertising(ctx).await?,
                SequencerAction::Pass | SequencerAction::None => {}
            },
            Event::Ready(fired)
                if (fired.socket == first || Some(fired.socket) == second)
                    && fired.readiness.contains(Readiness::WRITABLE) =>
            {
                ctx.driver().complete_connect(fired.socket, &expect)?;
                info!(sk = %fired.socket, "successfully connected");
                if sequencer.on_connected() == SequencerAction::Pass {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
}

async fn enable_peer_advertising(ctx: &mut TestContext) -> Result<(), CaseError> {
    let peer = ctx.peer();
    peer.set_adv_enable(true)
        .await
        .map_err(|e| CaseError::from_errno("peer advertising", e))
}

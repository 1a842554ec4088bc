#![forbid(unsafe_code)]

//! Incoming channel scenarios: the peer connects to the local controller and
//! either opens a channel to a local listener or sends a raw signalling
//! request whose response is checked byte for byte.

use bytes::Bytes;
use futures::future::BoxFuture;
use l2cap_core::signal::{CONN_RSP, CR_SUCCESS};
use l2cap_core::{AddressType, CaseError, ConnectionParameters};
use l2cap_transport::{PeerEvent, Readiness, SocketId};
use tracing::{debug, info, warn};

use super::start_transfer;
use crate::context::{Event, TestContext};
use crate::transfer::{Step, TransferSession};

pub fn serve(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_server(ctx))
}

/// What a signalling response means for the case.
#[derive(Debug, PartialEq, Eq)]
enum Response {
    Pass,
    /// The channel was accepted; the verdict comes from the accepted socket.
    Await,
}

fn le16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn check_response(
    ctx: &mut TestContext,
    params: &ConnectionParameters,
    listening: bool,
    code: u8,
    payload: &Bytes,
) -> Result<Response, CaseError> {
    info!(code = format_args!("0x{code:02x}"), len = payload.len(), "peer received response");
    if Some(code) != params.expect_command_code {
        return Err(CaseError::failed(format!(
            "unexpected response code 0x{code:02x}, expected {:?}",
            params.expect_command_code
        )));
    }

    if code == CONN_RSP {
        if let (Some(dcid), Some(scid)) = (le16(payload, 0), le16(payload, 2)) {
            ctx.link.local_cid = Some(dcid);
            ctx.link.peer_cid = Some(scid);
        }
        let accepted = le16(payload, 4) == Some(CR_SUCCESS);
        if (accepted && listening) || params.transfer.is_some() {
            return Ok(Response::Await);
        }
    }

    let Some(expected) = &params.raw_expect_command else {
        return Ok(Response::Pass);
    };
    if payload.len() != expected.len() {
        return Err(CaseError::failed(format!(
            "unexpected response length ({} != {})",
            payload.len(),
            expected.len()
        )));
    }
    if payload != expected {
        warn!(got = ?payload, expected = ?expected, "response mismatch");
        return Err(CaseError::failed("unexpected response"));
    }
    Ok(Response::Pass)
}

async fn run_server(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    let listener = if params.server_service_id.is_some() || params.channel_id.is_some() {
        let sk = ctx.open_channel(params.server_service_id.unwrap_or(0))?;
        ctx.driver().listen(sk, params.deferred_accept)?;
        ctx.watch(sk, Readiness::READABLE);
        info!(%sk, deferred = params.deferred_accept, "listening for connections");
        Some(sk)
    } else {
        None
    };

    let central = ctx.central_address();
    ctx.peer().hci_connect(central, AddressType::for_transport(ctx.transport()));

    let mut child: Option<SocketId> = None;
    let mut transfer: Option<TransferSession> = None;
    loop {
        let event = ctx.next_event().await?;
        if let Some(session) = transfer.as_mut() {
            match session.on_event(ctx, &event)? {
                Step::Complete => return Ok(()),
                Step::Progress => continue,
                Step::Ignored => {}
            }
        }
        match event {
            Event::Peer(PeerEvent::Connected { handle }) => {
                info!(handle, "new client connection");
                let request = (params.send_command_code, &params.raw_send_command);
                if let (Some(code), Some(raw)) = request {
                    debug!(code = format_args!("0x{code:02x}"), "sending request from peer");
                    ctx.peer()
                        .l2cap_request(handle, code, raw.clone())
                        .map_err(|e| CaseError::from_errno("peer request", e))?;
                }
            }
            Event::Peer(PeerEvent::SignalResponse { code, payload, .. }) => {
                if params.expect_command_code.is_none() {
                    continue;
                }
                let listening = listener.is_some();
                if check_response(ctx, &params, listening, code, &payload)? == Response::Pass {
                    return Ok(());
                }
            }
            Event::Ready(fired) if Some(fired.socket) == listener => {
                let Some(listener) = listener else { continue };
                let sk = ctx.accept(listener)?;
                if !params.deferred_accept {
                    match start_transfer(ctx, sk)? {
                        Some(session) => transfer = Some(session),
                        None => return Ok(()),
                    }
                    continue;
                }
                if params.expect_rejection_without_error {
                    // Closing a channel that was never authorised rejects it.
                    info!(%sk, "rejecting deferred channel");
                    ctx.close_socket(sk);
                    continue;
                }
                if ctx.driver().authorize_deferred(sk)? {
                    debug!(%sk, "accept deferred setup");
                }
                ctx.watch(sk, Readiness::WRITABLE);
                child = Some(sk);
            }
            Event::Ready(fired)
                if Some(fired.socket) == child && fired.readiness.contains(Readiness::WRITABLE) =>
            {
                match start_transfer(ctx, fired.socket)? {
                    Some(session) => transfer = Some(session),
                    None => return Ok(()),
                }
            }
            _ => {}
        }
    }
}

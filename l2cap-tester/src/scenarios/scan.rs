#![forbid(unsafe_code)]

//! Closing an LE socket whose connection is still pending.
//!
//! With the peer advertising but unreachable (the case connects to an
//! address nobody uses), the socket is closed while the controller scans and
//! the stack must stop scanning. With the peer silent, the scenario lets the
//! peer advertise once while withholding the connection completion, then
//! closes the socket; the stack must cancel connection creation.

use futures::future::BoxFuture;
use l2cap_core::hci::opcode;
use l2cap_core::{Advertising, CaseError};
use l2cap_stream::{CloseTracker, CloseVariant, ScanAction};
use tracing::{debug, info};

use crate::context::{Event, TestContext};

pub fn close_socket(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(run_close_socket(ctx))
}

async fn run_close_socket(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    ctx.subscribe_commands();
    let variant = if params.advertising == Advertising::None {
        CloseVariant::DuringConnect
    } else {
        CloseVariant::DuringScan
    };
    let mut tracker = CloseTracker::new(variant);

    let sk = ctx.open_channel(0)?;
    let addr = ctx.peer_sockaddr();
    ctx.driver()
        .connect(sk, addr)
        .map_err(|e| CaseError::failed(format!("can't connect socket: {}", e.desc())))?;
    info!(%sk, ?variant, peer = %addr.bdaddr, "connect in progress");
    let mut pending = Some(sk);

    loop {
        let Event::Command(cmd) = ctx.next_event().await? else {
            continue;
        };
        match tracker.on_command(&cmd) {
            ScanAction::None => {}
            ScanAction::CloseSocket => {
                let scanning = ctx.peer().central_le_scan_enabled();
                match variant {
                    CloseVariant::DuringScan if !scanning => {
                        return Err(CaseError::failed("controller should still be scanning"));
                    }
                    CloseVariant::DuringConnect if scanning => {
                        return Err(CaseError::failed("controller should no longer scan"));
                    }
                    _ => {}
                }
                if let Some(sk) = pending.take() {
                    info!(%sk, "closing pending socket");
                    ctx.close_socket(sk);
                }
                tracker.close_requested();
            }
            ScanAction::ProvokeConnection => {
                let guard = ctx.peer().suppress_completion(opcode::LE_CREATE_CONN);
                ctx.hold(guard);
                let peer = ctx.peer();
                // Advertise once: the stack stops scanning and creates the connection.
                peer.set_adv_enable(true)
                    .await
                    .map_err(|e| CaseError::from_errno("peer advertising", e))?;
                peer.set_adv_enable(false)
                    .await
                    .map_err(|e| CaseError::from_errno("peer advertising", e))?;
                debug!("peer advertised once");
            }
            ScanAction::Pass => {
                if variant == CloseVariant::DuringScan && ctx.peer().central_le_scan_enabled() {
                    return Err(CaseError::failed("scan still enabled after close"));
                }
                return Ok(());
            }
            ScanAction::Fail(reason) => return Err(CaseError::failed(reason)),
        }
    }
}

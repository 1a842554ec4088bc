#![forbid(unsafe_code)]

//! Scenario bodies: the running phase of each case.
//!
//! Each body drives its sockets through the [`ConnectionDriver`] and reacts to
//! events from [`TestContext::next_event`] until it reaches a verdict.
//! Returning `Ok(())` passes the case.
//!
//! [`ConnectionDriver`]: l2cap_transport::ConnectionDriver
//! [`TestContext::next_event`]: crate::context::TestContext::next_event

pub mod basic;
pub mod client;
pub mod scan;
pub mod server;

use l2cap_core::CaseError;
use l2cap_transport::{ChannelOptions, SocketId};
use tracing::info;

use crate::context::TestContext;
use crate::transfer::TransferSession;

/// Continue on a freshly established channel: start whichever transfer the
/// case carries. `None` means there is nothing left to do.
pub(crate) fn start_transfer(
    ctx: &mut TestContext,
    sk: SocketId,
) -> Result<Option<TransferSession>, CaseError> {
    let params = ctx.params();
    let mtu: ChannelOptions = ctx.driver().check_mtu(sk, &params)?;
    if params.inbound().is_some() {
        return TransferSession::start_inbound(ctx, sk, mtu).map(Some);
    }
    if params.outbound().is_some() {
        return TransferSession::start_outbound(ctx, sk, mtu).map(Some);
    }
    info!(%sk, "successfully connected");
    Ok(None)
}

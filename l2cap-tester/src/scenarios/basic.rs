#![forbid(unsafe_code)]

//! Scenarios that need no peer: socket creation, `getpeername` on an
//! unconnected socket and the timestamping capability report.

use futures::future::BoxFuture;
use l2cap_core::{CaseError, Errno, SocketKind, TimestampFlags};
use tracing::{debug, warn};

use crate::context::TestContext;

/// Capabilities every channel socket must report.
pub const EXPECTED_TIMESTAMPING: TimestampFlags = TimestampFlags::SOFTWARE
    .union(TimestampFlags::RX_SOFTWARE)
    .union(TimestampFlags::TX_SOFTWARE)
    .union(TimestampFlags::OPT_ID)
    .union(TimestampFlags::TX_COMPLETION);

pub fn basic_socket(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(async move {
        let sockets = ctx.sockets();
        let sk = sockets
            .open(SocketKind::DatagramSeq)
            .map_err(|e| {
                CaseError::failed(format!("can't create socket: {} ({})", e.desc(), e as i32))
            })?;
        sockets.close(sk);
        Ok(())
    })
}

pub fn getpeername_not_connected(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(async move {
        let sk = ctx.open_channel(0).map_err(|e| CaseError::failed(e.to_string()))?;
        let result = ctx.sockets().peer_name(sk);
        ctx.close_socket(sk);
        match result {
            Ok(addr) => Err(CaseError::failed(format!(
                "getpeername succeeded on non-connected socket: {}",
                addr.bdaddr
            ))),
            Err(Errno::ENOTCONN) => Ok(()),
            Err(e) => Err(CaseError::failed(format!(
                "unexpected getpeername error: {} ({})",
                e.desc(),
                e as i32
            ))),
        }
    })
}

pub fn ts_info(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(async move {
        let info = ctx
            .sockets()
            .ts_info()
            .map_err(|e| CaseError::from_errno("ETHTOOL_GET_TS_INFO", e))?;
        debug!(?info, "timestamping info");
        if info.so_timestamping != EXPECTED_TIMESTAMPING {
            warn!(
                got = ?info.so_timestamping,
                expected = ?EXPECTED_TIMESTAMPING,
                "capability mismatch"
            );
            return Err(CaseError::failed("unexpected SO_TIMESTAMPING capabilities"));
        }
        if info.phc_index != -1 || info.tx_types != 0 || info.rx_filters != 0 {
            return Err(CaseError::failed(format!(
                "unexpected hardware timestamping report: phc {} tx {:#x} rx {:#x}",
                info.phc_index, info.tx_types, info.rx_filters
            )));
        }
        Ok(())
    })
}

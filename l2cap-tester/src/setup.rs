#![forbid(unsafe_code)]

//! Phases shared by every case: controller discovery, the client and server
//! flavours of setup, and cleanup.

use futures::future::BoxFuture;
use l2cap_core::signal::signaling_cid;
use l2cap_core::{Advertising, CaseError, ConnectionParameters};
use l2cap_transport::{MgmtError, Setting};
use tracing::{debug, info, warn};

use crate::context::TestContext;

/// Page and inquiry scan.
const SCAN_PAGE_INQUIRY: u8 = 0x03;

fn mgmt_failed(err: MgmtError) -> CaseError {
    CaseError::failed(err.to_string())
}

pub fn pre_setup(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(discover_controller(ctx))
}

pub fn setup_client(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(powered_client(ctx))
}

pub fn setup_server(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(powered_server(ctx))
}

pub fn teardown(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(async move {
        ctx.teardown();
        Ok(())
    })
}

pub fn post_teardown(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(power_off(ctx))
}

/// The first controller must be the one the emulator drives.
async fn discover_controller(ctx: &mut TestContext) -> Result<(), CaseError> {
    let control = ctx.control();
    let indexes = control.read_index_list().await.map_err(mgmt_failed)?;
    let index = *indexes.first().ok_or_else(|| CaseError::failed("no controller present"))?;
    let info = control.read_info(index).await.map_err(mgmt_failed)?;
    debug!(
        index,
        address = %info.address,
        le = info.le_capable,
        bredr = info.bredr_capable,
        "controller info"
    );
    let expected = ctx.central_address();
    if info.address != expected {
        return Err(CaseError::failed(format!(
            "controller address {} does not match emulator address {expected}",
            info.address
        )));
    }
    ctx.set_index(index);
    Ok(())
}

async fn set(ctx: &mut TestContext, setting: Setting, enable: bool) -> Result<(), CaseError> {
    let index = ctx.index()?;
    let control = ctx.control();
    control.set_setting(index, setting, enable).await.map_err(mgmt_failed)
}

/// Pairing responders, peer pairing knobs and the settings both flavours need.
async fn powered_common(
    ctx: &mut TestContext,
    params: &ConnectionParameters,
) -> Result<(), CaseError> {
    ctx.subscribe_peer();
    ctx.subscribe_pairing()?;

    let peer = ctx.peer();
    if let Some(capability) = params.client_io_capability {
        peer.set_io_capability(capability);
    }
    if let Some(pin) = &params.client_pin {
        peer.set_pin_code(pin);
    }
    if params.reject_pairing {
        peer.set_reject_user_confirm(true);
    }

    if ctx.transport().is_le() {
        set(ctx, Setting::Le, true).await?;
    }
    if params.enable_pairing {
        set(ctx, Setting::Ssp, true).await?;
    }
    set(ctx, Setting::Bondable, true).await
}

async fn peer_ssp(ctx: &mut TestContext) -> Result<(), CaseError> {
    let peer = ctx.peer();
    peer.write_ssp_mode(true)
        .await
        .map_err(|e| CaseError::from_errno("peer simple pairing mode", e))
}

async fn powered_client(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    powered_common(ctx, &params).await?;

    if params.raw_send_command.is_some() || params.raw_expect_command.is_some() {
        let cid = signaling_cid(ctx.transport().is_le());
        ctx.hook(None, cid);
    }
    if params.advertising == Advertising::Direct {
        set(ctx, Setting::Advertising, true).await?;
    }
    set(ctx, Setting::Powered, true).await?;
    info!("controller powered on");

    // Expiry scenarios need a peer that never answers.
    if params.timeout.is_some() {
        return Ok(());
    }

    let peer = ctx.peer();
    if ctx.transport().is_le() {
        if params.advertising == Advertising::None {
            return Ok(());
        }
        peer.set_adv_enable(true)
            .await
            .map_err(|e| CaseError::from_errno("peer advertising", e))?;
    } else {
        peer.write_scan_enable(SCAN_PAGE_INQUIRY)
            .await
            .map_err(|e| CaseError::from_errno("peer scan enable", e))?;
    }
    debug!("peer connectable");

    if params.enable_pairing {
        peer_ssp(ctx).await?;
    }
    Ok(())
}

async fn powered_server(ctx: &mut TestContext) -> Result<(), CaseError> {
    let params = ctx.params();
    powered_common(ctx, &params).await?;

    set(ctx, Setting::Connectable, true).await?;
    if ctx.transport().is_le() {
        set(ctx, Setting::Advertising, true).await?;
    }
    set(ctx, Setting::Powered, true).await?;
    info!("controller powered on");

    if params.enable_pairing {
        peer_ssp(ctx).await?;
    }
    Ok(())
}

async fn power_off(ctx: &mut TestContext) -> Result<(), CaseError> {
    let Ok(index) = ctx.index() else {
        return Ok(());
    };
    let control = ctx.control();
    if let Err(err) = control.set_setting(index, Setting::Powered, false).await {
        warn!(%err, "power off failed");
    }
    Ok(())
}

//! Deferred acceptance: a held channel carries no data and gets no response
//! until the application reads from it once.

use futures::future::BoxFuture;
use l2cap_conformance::SimulatedEnvironment;
use l2cap_core::{AddressType, CaseError, Outcome, SimulatorConfig};
use l2cap_tester::setup::setup_server;
use l2cap_tester::{registry, Event, LifecycleController, PhaseFn, TestCase, TestContext};
use l2cap_transport::{PeerEvent, Readiness, SocketId};
use std::sync::Arc;
use std::time::Duration;

const EATT_SERVER: &str = "L2CAP LE EATT Server - Success";

/// The EATT server case with its scenario body replaced.
fn eatt_server(body: PhaseFn) -> TestCase {
    let cases = registry::all_cases();
    let case = cases
        .iter()
        .find(|c| c.name == EATT_SERVER)
        .unwrap_or_else(|| panic!("{EATT_SERVER} missing from the registry"));
    let params = (*case.params).clone();
    let name = format!("{EATT_SERVER} (custom body)");
    TestCase::new(name, case.transport, params, setup_server, body)
}

async fn outcome(case: &TestCase) -> Outcome {
    let env = Arc::new(SimulatedEnvironment::new(SimulatorConfig::default()));
    LifecycleController::new(env, Duration::from_secs(2)).run(case).await
}

/// Listen with deferred setup and let the peer connect.
fn listen_deferred(ctx: &mut TestContext) -> Result<SocketId, CaseError> {
    let params = ctx.params();
    let listener = ctx.open_channel(params.server_service_id.unwrap_or(0))?;
    ctx.driver().listen(listener, true)?;
    ctx.watch(listener, Readiness::READABLE);
    let central = ctx.central_address();
    ctx.peer().hci_connect(central, AddressType::LePublic);
    Ok(listener)
}

fn send_request(ctx: &mut TestContext, handle: u16) -> Result<(), CaseError> {
    let params = ctx.params();
    if let (Some(code), Some(raw)) = (params.send_command_code, &params.raw_send_command) {
        ctx.peer()
            .l2cap_request(handle, code, raw.clone())
            .map_err(|e| CaseError::from_errno("peer request", e))?;
    }
    Ok(())
}

/// Local channel id the case expects in the response.
fn expected_dcid(ctx: &TestContext) -> Result<u16, CaseError> {
    let params = ctx.params();
    params
        .raw_expect_command
        .as_ref()
        .and_then(|rsp| rsp.get(8..10))
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| CaseError::failed("no expected response"))
}

fn accept_without_reading(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(async move {
        let listener = listen_deferred(ctx)?;
        let mut held = Vec::new();
        loop {
            match ctx.next_event().await? {
                Event::Peer(PeerEvent::Connected { handle }) => send_request(ctx, handle)?,
                Event::Peer(PeerEvent::SignalResponse { .. }) => return Ok(()),
                Event::Ready(fired) if fired.socket == listener => {
                    held.push(ctx.accept(listener)?);
                }
                _ => {}
            }
        }
    })
}

fn data_after_authorization(ctx: &mut TestContext) -> BoxFuture<'_, Result<(), CaseError>> {
    Box::pin(async move {
        let listener = listen_deferred(ctx)?;
        let dcid = expected_dcid(ctx)?;
        let mut child = None;
        let mut responded = false;
        loop {
            match ctx.next_event().await? {
                Event::Peer(PeerEvent::Connected { handle }) => send_request(ctx, handle)?,
                Event::Peer(PeerEvent::SignalResponse { .. }) => responded = true,
                Event::Ready(fired) if fired.socket == listener => {
                    let sk = ctx.accept(listener)?;
                    if responded {
                        return Err(CaseError::failed("response before authorisation"));
                    }
                    let handle = ctx.link.handle.ok_or_else(|| CaseError::failed("no link"))?;
                    ctx.peer()
                        .send_cid(handle, dcid, b"early")
                        .map_err(|e| CaseError::from_errno("peer data", e))?;
                    if ctx.sockets().poll(sk).contains(Readiness::READABLE) {
                        return Err(CaseError::failed("held channel readable"));
                    }
                    let mut buf = [0u8; 16];
                    let received = ctx
                        .sockets()
                        .recv(sk, &mut buf)
                        .map_err(|e| CaseError::from_errno("authorising read", e))?;
                    if received.len != 0 || buf != [0u8; 16] {
                        return Err(CaseError::failed("payload before authorisation"));
                    }
                    child = Some(sk);
                }
                Event::Peer(PeerEvent::ChannelConnected { handle, local_cid, .. }) => {
                    let Some(sk) = child else {
                        return Err(CaseError::failed("channel announced before accept"));
                    };
                    // Nothing sent while held may surface now.
                    let mut buf = [0u8; 16];
                    if ctx.sockets().recv(sk, &mut buf).is_ok() {
                        return Err(CaseError::failed("data sent while held was delivered"));
                    }
                    ctx.peer()
                        .send_cid(handle, local_cid, b"late")
                        .map_err(|e| CaseError::from_errno("peer data", e))?;
                    ctx.watch(sk, Readiness::READABLE);
                }
                Event::Ready(fired) if Some(fired.socket) == child => {
                    let mut buf = [0u8; 16];
                    let received = ctx
                        .sockets()
                        .recv(fired.socket, &mut buf)
                        .map_err(|e| CaseError::from_errno("read", e))?;
                    if !responded {
                        return Err(CaseError::failed("data before the response"));
                    }
                    return if &buf[..received.len] == b"late" {
                        Ok(())
                    } else {
                        Err(CaseError::failed("unexpected payload"))
                    };
                }
                _ => {}
            }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn skipping_the_authorizing_read_never_passes() {
    let _ = tracing_subscriber::fmt::try_init();
    match outcome(&eatt_server(accept_without_reading)).await {
        Outcome::Failed(reason) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected a timeout, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn held_channel_carries_no_payload_before_authorization() {
    let outcome = outcome(&eatt_server(data_after_authorization)).await;
    assert!(outcome.is_passed(), "{outcome}");
}

#[tokio::test(start_paused = true)]
async fn registry_case_authorizes_and_passes() {
    let cases = registry::all_cases();
    let case = cases.iter().find(|c| c.name == EATT_SERVER).unwrap();
    let outcome = outcome(case).await;
    assert!(outcome.is_passed(), "{outcome}");
}

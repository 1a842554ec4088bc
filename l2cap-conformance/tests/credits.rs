//! The 32k LE write needs exactly the credits [`required_credits`] computes
//! for its MTU and MPS: the peer never refills, so one credit less stalls the
//! last SDU.

use l2cap_conformance::SimulatedEnvironment;
use l2cap_core::{ConnectionParameters, Outcome, SimulatorConfig, Transfer, Transport};
use l2cap_stream::required_credits;
use l2cap_tester::scenarios::client;
use l2cap_tester::setup::setup_client;
use l2cap_tester::{registry, LifecycleController, TestCase};
use std::sync::Arc;
use std::time::Duration;

fn le_write_32k(credits: u16) -> TestCase {
    let params = ConnectionParameters {
        client_service_id: Some(0x0080),
        server_service_id: Some(0x0080),
        mtu: Some(registry::LE_32K_MTU),
        mps: Some(registry::LE_32K_MPS),
        credits: Some(credits),
        transfer: Some(Transfer::Outbound(registry::L2_DATA_32K.clone())),
        ..Default::default()
    };
    let name = format!("LE write 32k with {credits} credits");
    TestCase::new(name, Transport::Le, params, setup_client, client::connect)
}

fn budget() -> u16 {
    let credits =
        required_credits(registry::L2_DATA_32K.len(), registry::LE_32K_MTU, registry::LE_32K_MPS)
            .unwrap();
    u16::try_from(credits).unwrap()
}

async fn outcome(case: &TestCase) -> Outcome {
    let env = Arc::new(SimulatedEnvironment::new(SimulatorConfig::default()));
    LifecycleController::new(env, Duration::from_secs(2)).run(case).await
}

#[tokio::test(start_paused = true)]
async fn exact_budget_passes() {
    let _ = tracing_subscriber::fmt::try_init();
    assert_eq!(budget(), registry::CREDITS_32K);
    let outcome = outcome(&le_write_32k(budget())).await;
    assert!(outcome.is_passed(), "{outcome}");
}

#[tokio::test(start_paused = true)]
async fn one_credit_short_times_out() {
    let outcome = outcome(&le_write_32k(budget() - 1)).await;
    match outcome {
        Outcome::Failed(reason) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected a timeout, got {other}"),
    }
}

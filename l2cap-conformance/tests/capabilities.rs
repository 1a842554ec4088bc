//! Cases that need a capability the local stack lacks abort instead of
//! failing, and the run as a whole still counts as a success.

use l2cap_conformance::SimulatedEnvironment;
use l2cap_core::{Outcome, SimulatorConfig};
use l2cap_tester::{registry, LifecycleController, Runner, Summary};
use std::sync::Arc;
use std::time::Duration;

async fn run(config: SimulatorConfig) -> Summary {
    let env = Arc::new(SimulatedEnvironment::new(config));
    let controller = LifecycleController::new(env, Duration::from_secs(2));
    Runner::new(controller, registry::all_cases()).run().await
}

fn aborted_names(summary: &Summary) -> Vec<&str> {
    summary
        .results
        .iter()
        .filter(|r| r.outcome.is_aborted())
        .map(|r| r.name.as_str())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn missing_ecred_aborts_flow_control_clients() {
    let _ = tracing_subscriber::fmt::try_init();
    let summary = run(SimulatorConfig { ecred_supported: false, ..Default::default() }).await;
    assert!(summary.success());

    let aborted = aborted_names(&summary);
    for name in aborted {
        assert!(name.contains("Ext-Flowctl") || name.contains("EATT"), "{name} aborted");
    }
    let clients = summary.results.iter().filter(|r| r.name.starts_with("L2CAP Ext-Flowctl Client"));
    for result in clients {
        assert!(result.outcome.is_aborted(), "{} was {}", result.name, result.outcome);
    }
    assert!(summary.outcome_of("L2CAP LE EATT Server - Success").is_some_and(Outcome::is_aborted));
    assert!(matches!(summary.outcome_of("L2CAP LE Client - Success"), Some(Outcome::Passed)));
}

#[tokio::test(start_paused = true)]
async fn missing_timestamping_aborts_timestamping_cases() {
    let config = SimulatorConfig { timestamping_supported: false, ..Default::default() };
    let summary = run(config).await;
    assert!(summary.success());

    let aborted = aborted_names(&summary);
    assert_eq!(aborted.len(), 7, "{aborted:?}");
    assert!(aborted.iter().all(|name| name.contains("Timestamping")));
    let write = summary.outcome_of("L2CAP BR/EDR Client - Write Success");
    assert!(matches!(write, Some(Outcome::Passed)));
}

#[tokio::test(start_paused = true)]
async fn missing_ts_info_aborts_ethtool_cases() {
    let summary = run(SimulatorConfig { ts_info_supported: false, ..Default::default() }).await;
    assert!(summary.success());
    assert_eq!(
        aborted_names(&summary),
        ["L2CAP BR/EDR Ethtool Get Ts Info - Success", "L2CAP LE Ethtool Get Ts Info - Success"]
    );
}

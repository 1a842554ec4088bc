use l2cap_conformance::SimulatedEnvironment;
use l2cap_core::{Outcome, SimulatorConfig, TesterConfig};
use l2cap_tester::{registry, LifecycleController, Runner, Summary};
use std::sync::Arc;
use std::time::Duration;

fn runner(config: SimulatorConfig) -> Runner {
    let env = Arc::new(SimulatedEnvironment::new(config));
    let controller = LifecycleController::new(env, Duration::from_secs(2));
    Runner::new(controller, registry::all_cases())
}

fn report(summary: &Summary) -> String {
    summary
        .results
        .iter()
        .filter(|r| !r.outcome.is_passed())
        .map(|r| format!("{}: {}", r.name, r.outcome))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test(start_paused = true)]
async fn whole_registry_passes_against_conformant_stack() {
    let _ = tracing_subscriber::fmt::try_init();
    let summary = runner(SimulatorConfig::default()).run().await;
    assert_eq!(summary.results.len(), registry::all_cases().len());
    assert_eq!(summary.passed(), summary.results.len(), "not passed:\n{}", report(&summary));
    assert!(summary.success());
}

#[tokio::test(start_paused = true)]
async fn results_keep_registry_order() {
    let summary = runner(SimulatorConfig::default()).run().await;
    let names: Vec<_> = summary.results.iter().map(|r| r.name.clone()).collect();
    let expected: Vec<_> = registry::all_cases().into_iter().map(|c| c.name).collect();
    assert_eq!(names, expected);
}

#[tokio::test(start_paused = true)]
async fn prefix_filter_runs_only_selected_cases() {
    let config = TesterConfig { prefix: Some("L2CAP LE EATT".into()), ..Default::default() };
    let runner = runner(SimulatorConfig::default()).filtered(&config);
    assert_eq!(
        runner.names().collect::<Vec<_>>(),
        [
            "L2CAP LE EATT Client - Success",
            "L2CAP LE EATT Server - Success",
            "L2CAP LE EATT Server - Reject",
        ]
    );
    let summary = runner.run().await;
    assert_eq!(summary.passed(), 3, "{}", report(&summary));
}

#[tokio::test(start_paused = true)]
async fn substring_filter_combines_with_prefix() {
    let config = TesterConfig {
        prefix: Some("L2CAP BR/EDR Server".into()),
        substring: Some("Invalid".into()),
        ..Default::default()
    };
    let runner = runner(SimulatorConfig::default()).filtered(&config);
    assert_eq!(runner.len(), 4);
    let summary = runner.run().await;
    assert!(summary.success(), "{}", report(&summary));
    let invalid_psm = summary.outcome_of("L2CAP BR/EDR Server - Invalid PSM");
    assert!(matches!(invalid_psm, Some(Outcome::Passed)));
}

#[tokio::test(start_paused = true)]
async fn empty_selection_is_a_successful_run() {
    let config = TesterConfig { prefix: Some("No such case".into()), ..Default::default() };
    let runner = runner(SimulatorConfig::default()).filtered(&config);
    assert!(runner.is_empty());
    let summary = runner.run().await;
    assert!(summary.results.is_empty());
    assert!(summary.success());
}

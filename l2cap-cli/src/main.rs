#![forbid(unsafe_code)]

//! `l2cap-tester`: runs the L2CAP conformance registry against the simulated
//! controllers and reports one line per case.
//!
//! The exit status is zero when no case failed. Cases the local stack cannot
//! run are reported as "Not Run" and do not count against it.

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{
    presets::UTF8_FULL, Attribute, Cell, Color as TableColor, ContentArrangement, Table,
};
use console::style;
use l2cap_conformance::SimulatedEnvironment;
use l2cap_core::{Outcome, TesterConfig};
use l2cap_tester::{registry, LifecycleController, Runner, Summary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "l2cap-tester", author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only cases whose name starts with this prefix
    #[arg(short, long)]
    prefix: Option<String>,

    /// Run only cases whose name contains this string
    #[arg(short = 's', long = "string")]
    substring: Option<String>,

    /// List the selected cases without running them
    #[arg(short, long)]
    list: bool,

    /// Log at debug level
    #[arg(short, long, conflicts_with = "quiet")]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// File configuration with the command line laid over it.
    fn tester_config(&self) -> Result<TesterConfig> {
        let mut config = match &self.config {
            Some(path) => TesterConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => TesterConfig::default(),
        };
        if let Some(prefix) = &self.prefix {
            config.prefix = Some(prefix.clone());
        }
        if let Some(substring) = &self.substring {
            config.substring = Some(substring.clone());
        }
        if self.debug {
            config.log_level = Some("debug".into());
        } else if self.quiet {
            config.log_level = Some("warn".into());
        }
        Ok(config)
    }
}

fn init_logging(config: &TesterConfig) {
    let level = config.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn outcome_cell(outcome: &Outcome) -> Cell {
    match outcome {
        Outcome::Passed => Cell::new("Passed").fg(TableColor::Green),
        Outcome::Failed(_) => Cell::new("Failed").fg(TableColor::Red),
        Outcome::Aborted(_) => Cell::new("Not Run").fg(TableColor::Yellow),
    }
}

fn render(summary: &Summary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Case").add_attribute(Attribute::Bold),
        Cell::new("Result").add_attribute(Attribute::Bold),
        Cell::new("Time").add_attribute(Attribute::Bold),
        Cell::new("Reason").add_attribute(Attribute::Bold),
    ]);
    for result in &summary.results {
        let reason = match &result.outcome {
            Outcome::Passed => String::new(),
            Outcome::Failed(reason) | Outcome::Aborted(reason) => reason.clone(),
        };
        table.add_row(vec![
            Cell::new(&result.name),
            outcome_cell(&result.outcome),
            Cell::new(format!("{:.3}s", result.elapsed.as_secs_f64())),
            Cell::new(reason),
        ]);
    }
    table
}

fn print_totals(summary: &Summary) {
    let total = summary.results.len();
    println!(
        "Total: {}, {}, {}, {}",
        total,
        style(format!("Passed: {}", summary.passed())).green(),
        style(format!("Failed: {}", summary.failed())).red(),
        style(format!("Not Run: {}", summary.aborted())).yellow(),
    );
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.tester_config()?;
    init_logging(&config);
    debug!(?config, "configuration loaded");

    let env = Arc::new(SimulatedEnvironment::new(config.simulator));
    let controller = LifecycleController::new(env, config.case_timeout);
    let runner = Runner::new(controller, registry::all_cases()).filtered(&config);

    if cli.list {
        for name in runner.names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    info!(cases = runner.len(), timeout = ?config.case_timeout, "starting run");
    let summary = runner.run().await;

    println!("\n{}", style("L2CAP Tester Summary").bold().cyan());
    println!("{}", render(&summary));
    print_totals(&summary);

    Ok(if summary.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

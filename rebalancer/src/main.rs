//! CLI entry point for the spotsync rebalancer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spotsync::{Price, Stock, Symbol};
use spotsync_broker::AccountState;
use spotsync_broker::mock::{MockBroker, MockState};

use spotsync_rebalancer::account::Account;
use spotsync_rebalancer::audit::{self, AuditLog};
use spotsync_rebalancer::config::Config;
use spotsync_rebalancer::execution;
use spotsync_rebalancer::plan;
use spotsync_rebalancer::reconcile;
use spotsync_rebalancer::target::{TargetAllocation, TargetSpec};

#[derive(Parser)]
#[command(name = "spotsync")]
#[command(about = "Broker-agnostic spot rebalancer")]
#[command(version)]
struct Cli {
    /// Path to config.toml (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the actions that would move the account to target
    Plan {
        /// Account snapshot: positions, open orders, quotes
        state: PathBuf,
        /// Path to target.json
        target: PathBuf,
    },

    /// Execute the plan against an in-memory broker seeded from the snapshot
    Simulate {
        state: PathBuf,
        target: PathBuf,
    },

    /// Compare holdings and open orders against target
    Reconcile {
        state: PathBuf,
        target: PathBuf,
    },

    /// Chase the snapshot's working limit orders to the current price
    Reprice {
        state: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Plan { state, target } => {
            let snapshot = load_state(&state)?;
            let quotes = quote_map(&snapshot);
            let allocation = resolve_target(&target, &quotes, &config)?;
            let plan = plan::plan(
                &account_state(&snapshot),
                &allocation,
                &quotes,
                &config.execution,
            );
            print!("{plan}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Simulate { state, target } => {
            let snapshot = load_state(&state)?;
            let quotes = quote_map(&snapshot);
            let allocation = resolve_target(&target, &quotes, &config)?;

            let mut audit = AuditLog::open(&config.audit_path())?;
            audit::log_run_started(&mut audit, &target.display().to_string(), &config.account.id)?;

            let mut account = Account::new(config.account.id.clone(), MockBroker::from_state(snapshot));
            let report = execution::rebalance(&mut account, &allocation, &config)?;
            if let Some(state) = account.state() {
                audit::log_snapshot(&mut audit, state)?;
            }
            audit::log_plan(&mut audit, &report.plan)?;
            audit::log_report(&mut audit, &report)?;

            print!("{report}");
            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
        Command::Reprice { state } => {
            let snapshot = load_state(&state)?;
            let mut audit = AuditLog::open(&config.audit_path())?;
            audit::log_run_started(&mut audit, "reprice", &config.account.id)?;

            let mut account = Account::new(config.account.id.clone(), MockBroker::from_state(snapshot));
            let report = execution::reprice_open_orders(&mut account, &config)?;
            audit::log_plan(&mut audit, &report.plan)?;
            audit::log_report(&mut audit, &report)?;

            print!("{report}");
            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(2))
            }
        }
        Command::Reconcile { state, target } => {
            let snapshot = load_state(&state)?;
            let quotes = quote_map(&snapshot);
            let allocation = resolve_target(&target, &quotes, &config)?;
            let report = reconcile::reconcile(
                &account_state(&snapshot),
                &allocation,
                &quotes,
                &config.execution,
            );
            print!("{report}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_state(path: &Path) -> anyhow::Result<MockState> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading state file {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing state file {}", path.display()))
}

fn quote_map(state: &MockState) -> BTreeMap<Symbol, Stock> {
    state.quotes.iter().map(|q| (q.symbol, q.clone())).collect()
}

fn account_state(state: &MockState) -> AccountState {
    AccountState {
        positions: state.positions.iter().filter(|p| !p.is_flat()).cloned().collect(),
        open_orders: state.open_orders.iter().filter(|o| o.is_live()).cloned().collect(),
    }
}

fn resolve_target(
    path: &Path,
    quotes: &BTreeMap<Symbol, Stock>,
    config: &Config,
) -> anyhow::Result<TargetAllocation> {
    let spec = TargetSpec::load(path)?;
    let prices: BTreeMap<Symbol, Price> = quotes
        .iter()
        .filter_map(|(s, q)| q.reference_price().map(|p| (*s, p)))
        .collect();
    Ok(spec.resolve(&prices, &config.execution)?)
}

//! API-Football scraper
//!
//! Batch CLI that:
//! 1. Rotates a pool of low-quota API keys under per-key rate limits
//! 2. Fetches teams, squads, player statistics and fixtures one request at a time
//! 3. Appends every finished unit to CSV so long scrapes can resume

mod config;
mod error;
mod metrics;
mod mock;
mod orchestrator;
mod persistence;
mod progress;
mod records;
mod stats;
mod validate;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use api_client::{ApiClient, CancelSignal, ReqwestTransport, Transport};
use clap::{Parser, Subcommand};
use common::Secret;
use key_pool::{KeyPool, QuotaLimits};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::mock::MockTransport;
use crate::orchestrator::{ALL_STATISTICS_FILE, Orchestrator, Pause, RunSummary, ScrapePlan};
use crate::persistence::{CsvStore, read_records};
use crate::progress::{PROGRESS_FILE, ProgressTracker};

/// Exit code of a run stopped by SIGINT/SIGTERM.
const EXIT_INTERRUPTED: u8 = 130;

/// Keys generated for `test --mock`.
const MOCK_KEYS: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "football-scraper")]
#[command(about = "Scrape API-Football team, squad, player and fixture data to CSV", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: CONFIG_PATH, then ./football-scraper.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show local key pool status and upstream account status per key
    Status,
    /// Run the full pipeline: teams, squads, player statistics, fixtures
    Scrape {
        /// Process only the first N teams
        #[arg(long)]
        max_teams: Option<usize>,
        /// Ignore the checkpoint and saved team list
        #[arg(long)]
        fresh: bool,
    },
    /// Fetch statistics missing for saved squads, such as newly configured
    /// seasons or units that failed
    Repair {
        /// Check only the first N saved teams
        #[arg(long)]
        max_teams: Option<usize>,
    },
    /// Fetch and print the team list only
    Teams,
    /// Scrape the squad and player statistics of one team
    Players {
        /// Team name, matched case-insensitively as a substring
        #[arg(long)]
        team: String,
    },
    /// Summarize saved player statistics
    Stats {
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// Bounded scrape for trying out a setup
    Test {
        /// Run against an in-process canned upstream, no keys needed
        #[arg(long)]
        mock: bool,
        #[arg(long, default_value_t = 3)]
        max_teams: usize,
    },
    /// Show or reset the scrape checkpoint
    Progress {
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Filter from LOG_LEVEL, then RUST_LOG, default `info`. JSON lines when
/// LOG_FORMAT=json. Logs go to stderr; stdout carries reports.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = Config::resolve_path(cli.config.as_deref());
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loading configuration");
    }
    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;
    info!(
        host = %config.api.host,
        keys = config.api_keys.len(),
        per_minute = config.quota.requests_per_key_per_minute,
        per_day = config.quota.requests_per_key_per_day,
        output = %config.output.dir.display(),
        "configuration loaded"
    );

    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let cancel = Arc::new(CancelSignal::new());
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    match cli.command {
        Command::Status => status(&config, cancel).await,
        Command::Scrape { max_teams, fresh } => {
            let mut client = live_client(&config, cancel)?;
            let mut store = CsvStore::new(&config.output.dir);
            let mut tracker =
                ProgressTracker::open(config.output.dir.join(PROGRESS_FILE), !fresh).await?;
            let mut plan = ScrapePlan::from_config(&config.scrape);
            plan.max_teams = max_teams;
            plan.resume = !fresh;

            let mut orchestrator =
                Orchestrator::new(&mut client, &mut store, plan).with_progress(&mut tracker);
            let result = orchestrator.run().await;
            finish(orchestrator.summary(), result, &prometheus, &config.output.dir).await
        }
        Command::Repair { max_teams } => {
            let mut client = live_client(&config, cancel)?;
            let mut store = CsvStore::new(&config.output.dir);
            let mut tracker =
                ProgressTracker::open(config.output.dir.join(PROGRESS_FILE), true).await?;
            let mut plan = ScrapePlan::from_config(&config.scrape);
            plan.max_teams = max_teams;

            let mut orchestrator =
                Orchestrator::new(&mut client, &mut store, plan).with_progress(&mut tracker);
            let result = orchestrator.repair().await;
            finish(orchestrator.summary(), result, &prometheus, &config.output.dir).await
        }
        Command::Test { mock, max_teams } => {
            let output = if mock {
                config.output.dir.join("mock")
            } else {
                config.output.dir.clone()
            };
            let mut client = if mock {
                mock_client(&config, cancel)
            } else {
                live_client(&config, cancel)?
            };
            let mut store = CsvStore::new(&output);
            let mut plan = ScrapePlan::from_config(&config.scrape);
            plan.max_teams = Some(max_teams);
            plan.resume = false;
            info!(mock, max_teams, output = %output.display(), "starting test run");

            let mut orchestrator = Orchestrator::new(&mut client, &mut store, plan);
            let result = orchestrator.run().await;
            finish(orchestrator.summary(), result, &prometheus, &output).await
        }
        Command::Teams => {
            let mut client = live_client(&config, cancel)?;
            let mut store = CsvStore::new(&config.output.dir);
            let plan = ScrapePlan::from_config(&config.scrape);

            let mut orchestrator = Orchestrator::new(&mut client, &mut store, plan);
            let result = orchestrator.run_teams().await;
            if let Ok(teams) = &result {
                println!("{:>6}  {:<28} {:<16} host", "id", "team", "qualification");
                for team in teams {
                    println!(
                        "{:>6}  {:<28} {:<16} {}",
                        team.id,
                        team.name,
                        cell(&team.row, "qualification"),
                        cell(&team.row, "is_host")
                    );
                }
            }
            finish(
                orchestrator.summary(),
                result.map(|_| ()),
                &prometheus,
                &config.output.dir,
            )
            .await
        }
        Command::Players { team } => {
            let mut client = live_client(&config, cancel)?;
            let mut store = CsvStore::new(&config.output.dir);
            let plan = ScrapePlan::from_config(&config.scrape);

            let mut orchestrator = Orchestrator::new(&mut client, &mut store, plan);
            let result = orchestrator.run_team(&team).await;
            match &result {
                Ok(Some(found)) => println!("Scraped {} (id {})", found.name, found.id),
                Ok(None) => println!("No team matching {team:?}"),
                Err(_) => {}
            }
            finish(
                orchestrator.summary(),
                result.map(|_| ()),
                &prometheus,
                &config.output.dir,
            )
            .await
        }
        Command::Stats { top } => {
            let path = config.output.dir.join(ALL_STATISTICS_FILE);
            let records = read_records(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if records.is_empty() {
                println!("No statistics at {}; run `scrape` first", path.display());
                return Ok(ExitCode::SUCCESS);
            }
            let players = stats::aggregate(&records);
            print!("{}", stats::render_report(&players, top));
            Ok(ExitCode::SUCCESS)
        }
        Command::Progress { reset } => progress(&config.output.dir.join(PROGRESS_FILE), reset).await,
    }
}

fn cell(row: &records::Row, column: &str) -> String {
    row.get(column).map(records::cell).unwrap_or_default()
}

fn live_client(config: &Config, cancel: Arc<CancelSignal>) -> Result<ApiClient> {
    config.require_keys()?;
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let transport = ReqwestTransport::new(http, &config.api.host, config.request_timeout());
    info!(base_url = transport.base_url(), "using live upstream");
    Ok(client_with(
        config,
        Box::new(transport),
        config.api_keys.clone(),
        config.quota_limits(),
        cancel,
    ))
}

/// Client against the canned upstream with generated keys. Limits are
/// raised so a mock run never waits on quota.
fn mock_client(config: &Config, cancel: Arc<CancelSignal>) -> ApiClient {
    let keys = (1..=MOCK_KEYS)
        .map(|n| (format!("mock-{n}"), Secret::new(format!("mock-key-{n}"))))
        .collect();
    let limits = QuotaLimits {
        per_minute: 1_000,
        per_day: 100_000,
    };
    client_with(config, Box::new(MockTransport::new()), keys, limits, cancel)
}

fn client_with(
    config: &Config,
    transport: Box<dyn Transport>,
    keys: Vec<(String, Secret<String>)>,
    limits: QuotaLimits,
    cancel: Arc<CancelSignal>,
) -> ApiClient {
    ApiClient::new(
        KeyPool::new(keys, limits),
        transport,
        config.client_options(),
        cancel,
    )
}

/// Print the summary, write the metrics snapshot and map the outcome to an
/// exit code.
async fn finish(
    summary: RunSummary,
    result: error::Result<()>,
    prometheus: &PrometheusHandle,
    output: &Path,
) -> Result<ExitCode> {
    print!("{}", orchestrator::render_summary(&summary));

    let metrics_path = output.join(metrics::METRICS_FILE);
    if let Err(e) = metrics::write_snapshot(prometheus, &metrics_path).await {
        warn!(error = %e, path = %metrics_path.display(), "failed to write metrics snapshot");
    }

    if summary.failed_units() > 0 {
        warn!(
            failed = summary.failed_units(),
            "some units failed; rerun `scrape` to retry them"
        );
    }
    result.context("scrape stopped")?;
    if summary.interrupted {
        info!("interrupted, exiting with {EXIT_INTERRUPTED}");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    match summary.paused {
        Some(Pause::ConsecutiveFailures { count }) => {
            error!(count, "stopped after consecutive failures, check keys and upstream");
            Ok(ExitCode::FAILURE)
        }
        Some(Pause::QuotaLow { remaining }) => {
            info!(remaining, "paused to keep a quota reserve, rerun once quotas reset");
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

async fn status(config: &Config, cancel: Arc<CancelSignal>) -> Result<ExitCode> {
    let mut client = live_client(config, cancel)?;

    for id in client.pool().ids() {
        let preview = client
            .pool()
            .credential(&id)
            .map(|c| c.secret.preview())
            .unwrap_or_default();
        let result = client.account_status(&id).await?;
        if !result.is_success() {
            println!(
                "{id} ({preview}): {} {}",
                result.status.label(),
                result.detail.as_deref().unwrap_or("")
            );
            continue;
        }
        let info = result
            .payload
            .as_ref()
            .and_then(|p| p.get("response"))
            .cloned()
            .unwrap_or_default();
        let text = |pointer: &str| {
            info.pointer(pointer)
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "-".to_string())
        };
        println!(
            "{id} ({preview}): {} {}, plan {}, requests {}/{}",
            text("/account/firstname"),
            text("/account/lastname"),
            text("/subscription/plan"),
            text("/requests/current"),
            text("/requests/limit_day"),
        );
    }

    let pool = client.pool_mut().status();
    println!("{}", serde_json::to_string_pretty(&pool)?);
    Ok(ExitCode::SUCCESS)
}

async fn progress(path: &Path, reset: bool) -> Result<ExitCode> {
    if reset {
        if ProgressTracker::reset(path).await? {
            println!("Removed {}", path.display());
        } else {
            println!("No checkpoint at {}", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    match ProgressTracker::read(path).await? {
        Some(state) => {
            println!("Run {} started at {}", state.run_id, state.started_at);
            println!("Team list saved: {}", state.teams_collected);
            println!("Completed teams: {}", state.completed_teams.len());
            for team in &state.completed_teams {
                println!(
                    "  {:<28} {:>3} players {:>5} stats rows",
                    team.team_name, team.squad_size, team.stats_rows
                );
            }
            println!("Failed teams: {}", state.failed_teams.len());
            for team in &state.failed_teams {
                println!("  {:<28} {}", team.team_name, team.reason);
            }
            println!("Fixture units done: {}", state.completed_fixtures.len());
            println!(
                "Statistics units pending retry: {}",
                state.pending_statistics.len()
            );
            println!("Logged errors: {}", state.errors.len());
        }
        None => println!("No checkpoint at {}", path.display()),
    }
    Ok(ExitCode::SUCCESS)
}

/// Wait for SIGTERM or SIGINT. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, stopping after the current request"),
        _ = terminate => info!("received SIGTERM, stopping after the current request"),
    }
}

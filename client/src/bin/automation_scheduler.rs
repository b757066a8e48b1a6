//! Automation scheduler - invokes the periodic sweeps on a fixed interval.
//!
//! Usage:
//!   cargo run --release --bin automation-scheduler -- --url http://localhost:8080
//!
//! Options:
//!   -u, --url         Server URL (default: http://localhost:8080)
//!   -p, --poll-secs   Interval between passes (default: 60)
//!   -s, --sweep       Sweep to run each pass; repeat for several (default: all four sweeps)
//!       --once        Run a single pass and exit

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use puosu_client::{Client, DiagnosticsLog};
use puosu_types::api::{SweepRequest, WalletPayoutsRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Sweep {
    TournamentAutomation,
    AutomatedWalletPayouts,
    ResolveDisputes,
    PlatformHealthMonitor,
    TrendingGamesOrchestrator,
}

const DEFAULT_SWEEPS: [Sweep; 4] = [
    Sweep::TournamentAutomation,
    Sweep::AutomatedWalletPayouts,
    Sweep::ResolveDisputes,
    Sweep::PlatformHealthMonitor,
];

#[derive(Parser, Debug)]
#[command(author, version, about = "Periodic automation sweep scheduler")]
struct Args {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "60")]
    poll_secs: u64,

    #[arg(short, long = "sweep", value_enum)]
    sweeps: Vec<Sweep>,

    #[arg(long)]
    once: bool,
}

impl Args {
    fn sweeps(&self) -> Vec<Sweep> {
        if self.sweeps.is_empty() {
            DEFAULT_SWEEPS.to_vec()
        } else {
            self.sweeps.clone()
        }
    }
}

/// One-line outcome of a sweep for the pass log.
async fn run_sweep(client: &Client, sweep: Sweep) -> puosu_client::Result<String> {
    let request = SweepRequest::default();
    Ok(match sweep {
        Sweep::TournamentAutomation => {
            let report = client.tournament_automation(&request).await?;
            format!(
                "opened={} started={} cancelled={} force_completed={} errors={}",
                report.registrations_opened.len(),
                report.tournaments_started.len(),
                report.tournaments_cancelled.len(),
                report.tournaments_force_completed.len() + report.challenges_force_completed.len(),
                report.errors.len()
            )
        }
        Sweep::AutomatedWalletPayouts => {
            let report = client
                .automated_wallet_payouts(&WalletPayoutsRequest::default())
                .await?;
            format!(
                "settled={} skipped={}",
                report.settlements.len(),
                report.skipped.len()
            )
        }
        Sweep::ResolveDisputes => {
            let report = client.resolve_disputes(&request).await?;
            format!(
                "resolved={} still_pending={}",
                report.resolved.len(),
                report.still_pending
            )
        }
        Sweep::PlatformHealthMonitor => {
            let report = client.platform_health_monitor(&request).await?;
            format!("status={:?} issues={}", report.status, report.issues.len())
        }
        Sweep::TrendingGamesOrchestrator => {
            let report = client.trending_games_orchestrator(&request).await?;
            format!(
                "active_before={} created={}",
                report.active_before,
                report.created.len()
            )
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if args.poll_secs == 0 && !args.once {
        bail!("--poll-secs must be positive");
    }

    let diagnostics = Arc::new(DiagnosticsLog::default());
    let client = Client::new(&args.url)?.with_diagnostics(diagnostics.clone());
    let sweeps = args.sweeps();

    info!(
        url = %args.url,
        poll_secs = args.poll_secs,
        sweeps = ?sweeps,
        "automation scheduler online"
    );

    let mut ticker = interval(Duration::from_secs(args.poll_secs.max(1)));
    loop {
        ticker.tick().await;
        for sweep in &sweeps {
            match run_sweep(&client, *sweep).await {
                Ok(summary) => info!(sweep = ?sweep, %summary, "sweep complete"),
                Err(err) => warn!(sweep = ?sweep, kind = ?err.kind(), %err, "sweep failed"),
            }
        }
        let failures = diagnostics.failures().len();
        if failures > 0 {
            warn!(
                failures,
                retained = diagnostics.len(),
                "recent failed calls in diagnostics"
            );
        }
        if args.once {
            return Ok(());
        }
    }
}

//! # Main — CLI entry point
//!
//! Routes the operational subcommands onto the fleet components: listing
//! pending failures, reconciling the ledger, dispatching a retry batch,
//! starting a one-shot supervised run, and running the always-on daemon.
//!
//! ## Global options
//!
//! - `--work-dir` / `FLEETSCRAPE_WORK_DIR`: root directory for all
//!   persisted state (run records, retry ledger, partitions, logs).
//! - `--worker-command`: program (plus fixed arguments) launched per worker
//!   group; the partition file path is appended as the last argument.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use fleetscrape::{
    BrowserPool, BrowserPoolConfig, Daemon, DedupIndex, Dispatcher, FleetConfig, ProcessSpawner,
    RetryLedger, RunStore, Supervisor, SupervisorConfig, SysinfoProbe,
};

#[derive(Parser)]
#[command(name = "fleetscrape", about = "Supervised fleet of scrape workers")]
struct Cli {
    /// Root directory for persisted state
    #[arg(long, env = "FLEETSCRAPE_WORK_DIR", default_value = "./fleet_state")]
    work_dir: PathBuf,

    /// Worker command line; the partition file is appended per group
    #[arg(long, num_args = 1.., default_values_t = [String::from("scrape-worker")])]
    worker_command: Vec<String>,

    /// Maximum items per dispatched batch
    #[arg(long)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pending failures with classification counts
    Pending {
        /// Only list entries attempted within this many days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Reconcile the ledger against run records, then sweep permanents
    Reconcile,
    /// Assemble and partition a batch of pending retries
    Dispatch,
    /// One-shot supervised run over candidate URLs from a file
    Run {
        /// File of candidate URLs, one per line
        #[arg(long)]
        candidates: Option<PathBuf>,
    },
    /// Run the always-on daemon (scheduler + health loops)
    Daemon,
}

struct Components {
    config: FleetConfig,
    ledger: Arc<RetryLedger>,
    dispatcher: Arc<Dispatcher>,
}

async fn build_components(cli: &Cli) -> Result<Components> {
    let mut builder = FleetConfig::builder()
        .work_dir(cli.work_dir.clone())
        .worker_command(cli.worker_command.clone());
    if let Some(batch_size) = cli.batch_size {
        builder = builder.batch_size(batch_size);
    }
    let config = builder.build()?;

    let runs = Arc::new(RunStore::new(config.runs_dir()));
    // Corrupted persisted state aborts startup here, by design
    let ledger = Arc::new(
        RetryLedger::load(
            config.ledger_path(),
            config.retry_budget(),
            config.staleness_days(),
        )
        .await
        .context("Startup aborted: retry ledger unreadable")?,
    );
    let dedup = Arc::new(DedupIndex::new(Arc::clone(&runs)));
    let dispatcher = Arc::new(Dispatcher::new(
        config.clone(),
        dedup,
        Arc::clone(&ledger),
        Arc::clone(&runs),
    ));

    Ok(Components {
        config,
        ledger,
        dispatcher,
    })
}

fn build_supervisor(config: &FleetConfig) -> Arc<Supervisor> {
    Supervisor::new(
        SupervisorConfig::from(config),
        Arc::new(ProcessSpawner::new(config.worker_command().to_vec())),
        Arc::new(SysinfoProbe::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let components = build_components(&cli).await?;

    match cli.command {
        Commands::Pending { days } => {
            let report = components.dispatcher.list_pending_failures(days).await?;
            print!("{}", report.summary);
            for url in &report.pending {
                println!("{url}");
            }
        }
        Commands::Reconcile => {
            let report = components.dispatcher.reconcile_ledger().await?;
            print!("{}", report.summary);
        }
        Commands::Dispatch => {
            let (report, specs) = components.dispatcher.dispatch_retry_batch().await?;
            print!("{}", report.summary);
            for spec in &specs {
                println!("{}: {}", spec.name, spec.partition_file.display());
            }
        }
        Commands::Run { candidates } => {
            let urls = match candidates {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Cannot read candidates file {}", path.display()))?
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(ToString::to_string)
                    .collect(),
                None => Vec::new(),
            };

            let supervisor = build_supervisor(&components.config);
            supervisor.start_event_pump().await;
            let report = components
                .dispatcher
                .start_supervised_run(urls, &supervisor)
                .await?;
            print!("{}", report.summary);

            tokio::spawn(fleetscrape::supervisor::liveness_loop(Arc::clone(
                &supervisor,
            )));
            info!("Run supervised; Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            supervisor.shutdown_all().await;
        }
        Commands::Daemon => {
            let supervisor = build_supervisor(&components.config);
            let pool = BrowserPool::new(BrowserPoolConfig::from(&components.config));
            let daemon = Daemon::new(
                components.config.clone(),
                supervisor,
                Arc::clone(&components.dispatcher),
                pool,
                Arc::clone(&components.ledger),
            );
            daemon.run().await?;
        }
    }

    Ok(())
}

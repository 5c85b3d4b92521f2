//! Top-level daemon
//!
//! Owns the always-on services: the supervisor's liveness loop, a periodic
//! aggregate health report, and the hour-of-day scheduler that triggers a
//! reconcile-then-dispatch cycle. Candidate URL lists are produced by an
//! external discovery collaborator and picked up from the candidates
//! directory.
//!
//! Shutdown is two-phase everywhere: on SIGINT the supervisor gracefully
//! terminates every group (SIGTERM, grace wait, SIGKILL) and the browser
//! pool is torn down last.

use anyhow::{Context, Result};
use chrono::{Local, Timelike};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::browser_pool::BrowserPool;
use crate::config::FleetConfig;
use crate::dispatch::Dispatcher;
use crate::retry_ledger::RetryLedger;
use crate::supervisor::{Supervisor, liveness_loop};

/// Interval between scheduler wakeups and health reports
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Always-on process tying the fleet together
pub struct Daemon {
    config: FleetConfig,
    supervisor: Arc<Supervisor>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<BrowserPool>,
    ledger: Arc<RetryLedger>,
    shutdown: AtomicBool,
}

impl Daemon {
    #[must_use]
    pub fn new(
        config: FleetConfig,
        supervisor: Arc<Supervisor>,
        dispatcher: Arc<Dispatcher>,
        pool: Arc<BrowserPool>,
        ledger: Arc<RetryLedger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            supervisor,
            dispatcher,
            pool,
            ledger,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Directory the external discovery collaborator drops URL lists into
    #[must_use]
    pub fn candidates_dir(&self) -> PathBuf {
        self.config.work_dir().join("candidates")
    }

    /// Run until SIGINT/SIGTERM, then shut the fleet down cleanly
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        info!("Daemon starting (schedule hours: {:?})", self.config.schedule_hours());
        tokio::fs::create_dir_all(self.candidates_dir())
            .await
            .context("Failed to create candidates directory")?;

        self.supervisor.start_event_pump().await;
        tokio::spawn(liveness_loop(Arc::clone(&self.supervisor)));

        let scheduler = {
            let daemon = Arc::clone(self);
            tokio::spawn(async move { daemon.scheduler_loop().await })
        };
        let health = {
            let daemon = Arc::clone(self);
            tokio::spawn(async move { daemon.health_loop().await })
        };

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");

        self.shutdown.store(true, Ordering::Relaxed);
        scheduler.abort();
        health.abort();

        self.supervisor.shutdown_all().await;
        self.pool.close_all().await;
        info!("Daemon stopped");
        Ok(())
    }

    /// Fire the dispatch cycle at each configured hour, at most once per
    /// hour slot
    async fn scheduler_loop(&self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        let mut last_fired: Option<(String, u32)> = None;

        while !self.shutdown.load(Ordering::Relaxed) {
            interval.tick().await;

            let now = Local::now();
            let slot = (now.format("%Y-%m-%d").to_string(), now.hour());
            if !self.config.schedule_hours().contains(&slot.1) {
                continue;
            }
            if last_fired.as_ref() == Some(&slot) {
                continue;
            }
            last_fired = Some(slot.clone());

            info!("Scheduled trigger at hour {}", slot.1);
            if let Err(e) = self.run_cycle().await {
                error!("Scheduled cycle failed: {e:#}");
            }
        }
    }

    /// One full cycle: reconcile, gather candidates, dispatch supervised run
    async fn run_cycle(&self) -> Result<()> {
        let report = self.dispatcher.reconcile_ledger().await?;
        info!("{}", report.summary.trim_end());

        let candidates = self.collect_candidates().await?;
        let report = self
            .dispatcher
            .start_supervised_run(candidates, &self.supervisor)
            .await?;
        info!("{}", report.summary.trim_end());
        Ok(())
    }

    /// Read every candidate list the discovery collaborator has dropped
    async fn collect_candidates(&self) -> Result<Vec<String>> {
        let dir = self.candidates_dir();
        let mut candidates = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(candidates),
            Err(e) => return Err(e).context("Failed to read candidates directory"),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to iterate candidates directory")?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "txt") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => {
                    candidates.extend(
                        contents
                            .lines()
                            .map(str::trim)
                            .filter(|line| !line.is_empty())
                            .map(ToString::to_string),
                    );
                }
                Err(e) => warn!("Skipping unreadable candidate list {}: {}", path.display(), e),
            }
        }

        debug!("Collected {} candidate URLs", candidates.len());
        Ok(candidates)
    }

    /// Periodic aggregate health report across supervisor, pool and ledger
    async fn health_loop(&self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        while !self.shutdown.load(Ordering::Relaxed) {
            interval.tick().await;

            let pool = self.pool.stats().await;
            let counts = self.ledger.status_counts().await;
            let groups = self.supervisor.status_summary().await;

            info!(
                "health: pool {}/{} live ({} idle), ledger {:?}, {} groups",
                pool.live,
                pool.max,
                pool.idle,
                counts,
                groups.len()
            );
            for status in groups {
                debug!(
                    "  {} pid {} {:?} restarts {}",
                    status.group, status.pid, status.status, status.restart_count
                );
            }
        }
    }
}

//! Worker process supervision
//!
//! Each worker group is one OS process assigned a partition of pending
//! work. The supervisor owns the full lifecycle: spawn with piped logs,
//! liveness detection (existence, then idle time, then CPU to distinguish
//! a hang from slow-but-working), two-phase termination, and relaunch with
//! a bounded restart budget. A group that keeps crashing is frozen as
//! `Disabled` until its cooldown elapses.
//!
//! Worker crashes and hangs are handled exclusively here — they are never
//! exceptions. Per-URL failures inside a healthy worker are the retry
//! ledger's concern and never reach the supervisor.

pub mod liveness;
pub mod worker;

pub use liveness::{LivenessProbe, ScriptedProbe, SysinfoProbe};
pub use worker::{GroupSpec, ProcessSpawner, TerminateMode, WorkerEvent, WorkerProc, WorkerSpawner};

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::error::WorkerError;

/// Observed state of a worker group's process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Alive and showing activity
    Running,
    /// Alive but idle past the threshold with near-zero CPU
    Stuck,
    /// Process no longer exists
    Dead,
    /// Exit observed; awaiting the next liveness pass
    Exited,
    /// Restart cap exceeded; frozen until cooldown
    Disabled,
}

/// Supervision record for one worker group
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub group: String,
    pub pid: u32,
    pub started_at: Instant,
    pub last_activity: Instant,
    pub restart_count: u32,
    pub status: WorkerStatus,
    pub exit_code: Option<i32>,
    pub disabled_at: Option<Instant>,
}

/// One row of the status summary
#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub group: String,
    pub pid: u32,
    pub status: WorkerStatus,
    pub uptime_secs: u64,
    pub idle_secs: u64,
    pub restart_count: u32,
}

/// Timing and budget knobs for supervision
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub liveness_interval: Duration,
    pub idle_threshold: Duration,
    pub stuck_cpu_threshold: f32,
    pub grace_period: Duration,
    pub restart_delay: Duration,
    pub restart_cap: u32,
    pub restart_cooldown: Duration,
    pub logs_dir: PathBuf,
}

impl From<&FleetConfig> for SupervisorConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            liveness_interval: config.liveness_interval(),
            idle_threshold: config.idle_threshold(),
            stuck_cpu_threshold: config.stuck_cpu_threshold(),
            grace_period: config.grace_period(),
            restart_delay: config.restart_delay(),
            restart_cap: config.restart_cap(),
            restart_cooldown: config.restart_cooldown(),
            logs_dir: config.logs_dir(),
        }
    }
}

/// Supervisor over all worker groups
pub struct Supervisor {
    config: SupervisorConfig,
    spawner: Arc<dyn WorkerSpawner>,
    probe: Arc<dyn LivenessProbe>,
    records: Mutex<HashMap<String, WorkerRecord>>,
    procs: Mutex<HashMap<String, Box<dyn WorkerProc>>>,
    specs: Mutex<HashMap<String, GroupSpec>>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    shutdown: AtomicBool,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        spawner: Arc<dyn WorkerSpawner>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            spawner,
            probe,
            records: Mutex::new(HashMap::new()),
            procs: Mutex::new(HashMap::new()),
            specs: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Start the background event pump translating worker output/exit
    /// events into record updates. Call once after construction.
    pub async fn start_event_pump(self: &Arc<Self>) {
        let Some(mut rx) = self.events_rx.lock().await.take() else {
            return;
        };
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    WorkerEvent::Output { group } => {
                        let mut records = supervisor.records.lock().await;
                        if let Some(record) = records.get_mut(&group) {
                            // Any output byte counts as activity, real
                            // progress or not.
                            record.last_activity = Instant::now();
                        }
                    }
                    WorkerEvent::Exited { group, code } => {
                        info!("Worker group {group} exited with code {code:?}");
                        let mut records = supervisor.records.lock().await;
                        if let Some(record) = records.get_mut(&group)
                            && record.status != WorkerStatus::Disabled
                        {
                            record.status = WorkerStatus::Exited;
                            record.exit_code = code;
                        }
                    }
                }
            }
            debug!("Worker event pump exiting");
        });
    }

    /// Start one worker group fresh (restart count zero)
    pub async fn start_group(&self, spec: GroupSpec) -> Result<(), WorkerError> {
        self.specs
            .lock()
            .await
            .insert(spec.name.clone(), spec.clone());
        self.launch(&spec, 0).await
    }

    /// Start several groups, staggered so browser/profile startup spikes
    /// do not overlap
    pub async fn start_groups(&self, specs: Vec<GroupSpec>) -> Result<(), WorkerError> {
        for spec in specs {
            self.start_group(spec).await?;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(())
    }

    async fn launch(&self, spec: &GroupSpec, restart_count: u32) -> Result<(), WorkerError> {
        tokio::fs::create_dir_all(&self.config.logs_dir)
            .await
            .map_err(|e| WorkerError::SpawnFailed {
                group: spec.name.clone(),
                reason: format!("cannot create logs dir: {e}"),
            })?;
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let log_path = self.config.logs_dir.join(format!("{}_{stamp}.log", spec.name));

        let proc = self
            .spawner
            .spawn(spec, &log_path, self.events_tx.clone())
            .await?;
        let pid = proc.pid();
        let now = Instant::now();

        self.procs.lock().await.insert(spec.name.clone(), proc);
        self.records.lock().await.insert(
            spec.name.clone(),
            WorkerRecord {
                group: spec.name.clone(),
                pid,
                started_at: now,
                last_activity: now,
                restart_count,
                status: WorkerStatus::Running,
                exit_code: None,
                disabled_at: None,
            },
        );

        info!(
            "Worker group {} started (pid {pid}, restarts {restart_count}), log {}",
            spec.name,
            log_path.display()
        );
        Ok(())
    }

    /// One liveness pass over all running groups.
    ///
    /// Existence first (absent means dead); then idle time; only an idle
    /// worker gets its CPU sampled — below the threshold confirms a hang
    /// rather than a slow-but-working task.
    pub async fn check_liveness(&self) {
        // Existence and idle checks under the lock; CPU sampling happens
        // outside it because the sample spans a measurement interval.
        let suspects: Vec<(String, u32)> = {
            let mut records = self.records.lock().await;
            let mut suspects = Vec::new();
            for record in records.values_mut() {
                if record.status != WorkerStatus::Running {
                    continue;
                }

                if !self.probe.exists(record.pid) {
                    warn!("Worker group {} (pid {}) is dead", record.group, record.pid);
                    record.status = WorkerStatus::Dead;
                    continue;
                }

                if record.last_activity.elapsed() > self.config.idle_threshold {
                    suspects.push((record.group.clone(), record.pid));
                }
            }
            suspects
        };

        for (group, pid) in suspects {
            let probe = Arc::clone(&self.probe);
            let cpu = tokio::task::spawn_blocking(move || probe.cpu_percent(pid))
                .await
                .unwrap_or(0.0);

            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(&group) else {
                continue;
            };
            // The sample is only meaningful if the worker stayed idle and
            // running while we took it
            if record.status != WorkerStatus::Running
                || record.last_activity.elapsed() <= self.config.idle_threshold
            {
                continue;
            }
            if cpu < self.config.stuck_cpu_threshold {
                warn!(
                    "Worker group {group} confirmed stuck: idle {:?}, CPU {cpu:.1}%",
                    record.last_activity.elapsed()
                );
                record.status = WorkerStatus::Stuck;
            } else {
                debug!("Worker group {group} idle but CPU {cpu:.1}%, still working");
            }
        }
    }

    /// Recover every unhealthy group: two-phase terminate, restart delay,
    /// then relaunch with the restart count carried forward — or freeze the
    /// group as disabled once the cap is exceeded.
    ///
    /// Disabled groups whose cooldown has elapsed get their count reset and
    /// are relaunched.
    pub async fn recover_unhealthy(&self) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }

        let (unhealthy, cooled_down) = {
            let records = self.records.lock().await;
            let unhealthy: Vec<String> = records
                .values()
                .filter(|r| {
                    matches!(
                        r.status,
                        WorkerStatus::Stuck | WorkerStatus::Dead | WorkerStatus::Exited
                    )
                })
                .map(|r| r.group.clone())
                .collect();
            let cooled_down: Vec<String> = records
                .values()
                .filter(|r| {
                    r.status == WorkerStatus::Disabled
                        && r.disabled_at
                            .is_some_and(|at| at.elapsed() >= self.config.restart_cooldown)
                })
                .map(|r| r.group.clone())
                .collect();
            (unhealthy, cooled_down)
        };

        for group in unhealthy {
            self.recycle_group(&group).await;
        }

        for group in cooled_down {
            info!("Cooldown elapsed for disabled group {group}, resetting restart count");
            {
                let mut records = self.records.lock().await;
                if let Some(record) = records.get_mut(&group) {
                    record.restart_count = 0;
                    record.disabled_at = None;
                }
            }
            let spec = self.specs.lock().await.get(&group).cloned();
            if let Some(spec) = spec
                && let Err(e) = self.launch(&spec, 0).await
            {
                warn!("Relaunch after cooldown failed for group {group}: {e}");
            }
        }
    }

    /// Two-phase terminate one group and either relaunch it or disable it
    async fn recycle_group(&self, group: &str) {
        info!("Recovering worker group {group}");
        self.terminate_group(group).await;
        tokio::time::sleep(self.config.restart_delay).await;

        let restart_count = {
            let mut records = self.records.lock().await;
            let Some(record) = records.get_mut(group) else {
                return;
            };
            record.restart_count += 1;
            if record.restart_count > self.config.restart_cap {
                warn!(
                    "Worker group {group} exceeded restart cap ({}), disabling pending manual intervention",
                    self.config.restart_cap
                );
                record.status = WorkerStatus::Disabled;
                record.disabled_at = Some(Instant::now());
                return;
            }
            record.restart_count
        };

        let spec = self.specs.lock().await.get(group).cloned();
        if let Some(spec) = spec {
            match self.launch(&spec, restart_count).await {
                Ok(()) => info!("Worker group {group} relaunched (restart #{restart_count})"),
                Err(e) => warn!("Relaunch failed for group {group}: {e}"),
            }
        }
    }

    /// Graceful signal, bounded grace wait, then force kill
    async fn terminate_group(&self, group: &str) {
        let proc = self.procs.lock().await.remove(group);
        if let Some(proc) = proc {
            proc.terminate(TerminateMode::Graceful);
            tokio::time::sleep(self.config.grace_period).await;
            if self.probe.exists(proc.pid()) {
                warn!("Worker group {group} survived SIGTERM, force killing");
                proc.terminate(TerminateMode::Force);
            }
        }
    }

    /// Two-phase shutdown of every group; no restarts afterwards
    pub async fn shutdown_all(&self) {
        info!("Shutting down all worker groups");
        self.shutdown.store(true, Ordering::Relaxed);

        let groups: Vec<String> = self.procs.lock().await.keys().cloned().collect();
        for group in groups {
            self.terminate_group(&group).await;
            let mut records = self.records.lock().await;
            if let Some(record) = records.get_mut(&group) {
                record.status = WorkerStatus::Exited;
            }
        }
        info!("All worker groups stopped");
    }

    /// Status of one group
    pub async fn group_status(&self, group: &str) -> Option<WorkerRecord> {
        self.records.lock().await.get(group).cloned()
    }

    /// Status summary across all groups, sorted by group name
    pub async fn status_summary(&self) -> Vec<GroupStatus> {
        let records = self.records.lock().await;
        let mut summary: Vec<GroupStatus> = records
            .values()
            .map(|r| GroupStatus {
                group: r.group.clone(),
                pid: r.pid,
                status: r.status,
                uptime_secs: r.started_at.elapsed().as_secs(),
                idle_secs: r.last_activity.elapsed().as_secs(),
                restart_count: r.restart_count,
            })
            .collect();
        summary.sort_by(|a, b| a.group.cmp(&b.group));
        summary
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Background task: periodic liveness check and recovery.
///
/// Runs on a fixed timer regardless of dispatch activity, exactly like the
/// pool's background loops: the health of the fleet is independent of
/// whether new work is flowing.
pub async fn liveness_loop(supervisor: Arc<Supervisor>) {
    let mut interval = tokio::time::interval(supervisor.config.liveness_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !supervisor.shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        supervisor.check_liveness().await;
        supervisor.recover_unhealthy().await;

        for status in supervisor.status_summary().await {
            debug!(
                "group {} | pid {} | {:?} | up {}s | idle {}s | restarts {}",
                status.group,
                status.pid,
                status.status,
                status.uptime_secs,
                status.idle_secs,
                status.restart_count
            );
        }
    }
    debug!("Liveness loop exiting");
}

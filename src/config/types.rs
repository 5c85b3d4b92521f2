//! Core configuration types for the scrape fleet
//!
//! This module contains the main `FleetConfig` struct defining where state
//! lives on disk, how the worker fleet is shaped, and the timing knobs for
//! pooling, liveness and retry classification.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for a supervised fleet run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Root directory for all persisted state.
    ///
    /// **INVARIANT:** Always an absolute path (normalized in builder).
    /// Layout underneath: `runs/<date>/records.json` (per-run record
    /// stores), `failed_urls.json` (+ timestamped backups) for the retry
    /// ledger, `partitions/` for dispatch files, `logs/` for worker logs.
    pub(crate) work_dir: PathBuf,

    /// Command line used to launch one worker process. The partition file
    /// path is appended as the final argument. The worker itself (scrape +
    /// rewrite) is an external collaborator; the supervisor only owns its
    /// process lifecycle.
    pub(crate) worker_command: Vec<String>,

    /// Number of worker groups. Together with `per_group_concurrency` this
    /// fixes the global in-flight cap; it is structural, not tunable.
    pub(crate) group_count: usize,

    /// Fixed internal concurrency of each worker group
    pub(crate) per_group_concurrency: usize,

    /// Maximum concurrently live browser sessions
    pub(crate) max_browsers: usize,

    /// Maximum leased pages per browser session
    pub(crate) max_pages_per_browser: usize,

    /// Run browsers in headless mode
    pub(crate) headless: bool,

    /// Bounded wait for `acquire()` before failing with `Exhausted`.
    ///
    /// The source system waited forever here; a bounded wait turns a
    /// sustained-exhaustion deadlock into a visible error.
    pub(crate) acquire_timeout: Duration,

    /// Poll interval while waiting for a pooled handle
    pub(crate) pool_poll_interval: Duration,

    /// Liveness loop period
    pub(crate) liveness_interval: Duration,

    /// Idle time after which a worker's CPU is sampled
    pub(crate) idle_threshold: Duration,

    /// CPU percent below which an idle worker counts as stuck
    pub(crate) stuck_cpu_threshold: f32,

    /// Grace period between graceful terminate and force kill
    pub(crate) grace_period: Duration,

    /// Delay before relaunching a recovered group
    pub(crate) restart_delay: Duration,

    /// Restarts beyond this cap freeze the group as disabled
    pub(crate) restart_cap: u32,

    /// Disabled groups become restartable after this cooldown
    pub(crate) restart_cooldown: Duration,

    /// Per-URL failure budget before permanent abandonment
    pub(crate) retry_budget: u32,

    /// Ledger entries older than this many days are abandoned
    pub(crate) staleness_days: i64,

    /// Maximum items per dispatched batch
    pub(crate) batch_size: usize,

    /// Hours of day (local) at which the daemon triggers a dispatch
    pub(crate) schedule_hours: Vec<u32>,
}

impl FleetConfig {
    /// Global in-flight concurrency cap.
    ///
    /// Product of group count and per-group concurrency. Enforced by fixing
    /// the partition sizing at dispatch, never by dynamic throttling.
    #[must_use]
    pub fn global_concurrency_cap(&self) -> usize {
        self.group_count * self.per_group_concurrency
    }

    /// Directory holding per-run record stores
    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.work_dir.join("runs")
    }

    /// Path of the retry ledger store
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.work_dir.join("failed_urls.json")
    }

    /// Directory for dispatch partition files
    #[must_use]
    pub fn partitions_dir(&self) -> PathBuf {
        self.work_dir.join("partitions")
    }

    /// Directory for per-group worker logs
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }
}

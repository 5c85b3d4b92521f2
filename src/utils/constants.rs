//! Structural constants for the fleet.
//!
//! The concurrency-related values here are driven by hard external limits
//! (upstream rate limits on the rewriting service), not by tuning. The
//! global in-flight cap is always `worker group count × per-group
//! concurrency`; changing either side changes the cap, so both are fixed
//! structural constants rather than runtime knobs.

use std::time::Duration;

/// Number of supervised worker groups
pub const DEFAULT_GROUP_COUNT: usize = 3;

/// Fixed internal concurrency of a single worker group
pub const DEFAULT_PER_GROUP_CONCURRENCY: usize = 2;

/// Maximum concurrently live browser sessions
pub const DEFAULT_MAX_BROWSERS: usize = 2;

/// Maximum leased pages per browser session
pub const DEFAULT_MAX_PAGES_PER_BROWSER: usize = 5;

/// Poll interval while waiting for a pooled handle
pub const POOL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bounded wait before `acquire()` fails with `Exhausted`
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Liveness loop period
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Idle time after which a worker's CPU is sampled
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(300);

/// CPU utilization below this confirms a hang rather than slow work
pub const STUCK_CPU_THRESHOLD: f32 = 1.0;

/// Grace period between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Delay before relaunching a recovered group
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Restarts beyond this cap freeze the group as disabled
pub const DEFAULT_RESTART_CAP: u32 = 3;

/// Disabled groups become restartable again after this cooldown
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(3600);

/// Failures per URL beyond this budget become permanent
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Ledger entries untouched for longer than this are abandoned
pub const DEFAULT_STALENESS_DAYS: i64 = 7;

/// Run records stuck in `processing` longer than this are considered interrupted
pub const STALE_PROCESSING_AGE: Duration = Duration::from_secs(3600);

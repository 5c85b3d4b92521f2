//! Read accessors for `FleetConfig`
//!
//! Fields are `pub(crate)` and mutated only through the builder; these
//! getters are the public read surface.

use std::path::Path;
use std::time::Duration;

use super::types::FleetConfig;

impl FleetConfig {
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn worker_command(&self) -> &[String] {
        &self.worker_command
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.group_count
    }

    #[must_use]
    pub fn per_group_concurrency(&self) -> usize {
        self.per_group_concurrency
    }

    #[must_use]
    pub fn max_browsers(&self) -> usize {
        self.max_browsers
    }

    #[must_use]
    pub fn max_pages_per_browser(&self) -> usize {
        self.max_pages_per_browser
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    #[must_use]
    pub fn pool_poll_interval(&self) -> Duration {
        self.pool_poll_interval
    }

    #[must_use]
    pub fn liveness_interval(&self) -> Duration {
        self.liveness_interval
    }

    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    #[must_use]
    pub fn stuck_cpu_threshold(&self) -> f32 {
        self.stuck_cpu_threshold
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    #[must_use]
    pub fn restart_cap(&self) -> u32 {
        self.restart_cap
    }

    #[must_use]
    pub fn restart_cooldown(&self) -> Duration {
        self.restart_cooldown
    }

    #[must_use]
    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    #[must_use]
    pub fn staleness_days(&self) -> i64 {
        self.staleness_days
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn schedule_hours(&self) -> &[u32] {
        &self.schedule_hours
    }
}

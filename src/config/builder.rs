//! Type-safe builder for `FleetConfig` using the typestate pattern
//!
//! Provides a fluent builder with compile-time validation that the two
//! required fields (work directory and worker command) are set before a
//! `FleetConfig` can be built.

use anyhow::{Result, anyhow};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use super::types::FleetConfig;
use crate::utils::constants::*;

// Type states for the builder
pub struct WithWorkDir;
pub struct Complete;

pub struct FleetConfigBuilder<State = ()> {
    pub(crate) work_dir: Option<PathBuf>,
    pub(crate) worker_command: Vec<String>,
    pub(crate) group_count: usize,
    pub(crate) per_group_concurrency: usize,
    pub(crate) max_browsers: usize,
    pub(crate) max_pages_per_browser: usize,
    pub(crate) headless: bool,
    pub(crate) acquire_timeout: Duration,
    pub(crate) pool_poll_interval: Duration,
    pub(crate) liveness_interval: Duration,
    pub(crate) idle_threshold: Duration,
    pub(crate) stuck_cpu_threshold: f32,
    pub(crate) grace_period: Duration,
    pub(crate) restart_delay: Duration,
    pub(crate) restart_cap: u32,
    pub(crate) restart_cooldown: Duration,
    pub(crate) retry_budget: u32,
    pub(crate) staleness_days: i64,
    pub(crate) batch_size: usize,
    pub(crate) schedule_hours: Vec<u32>,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for FleetConfigBuilder<()> {
    fn default() -> Self {
        Self {
            work_dir: None,
            worker_command: Vec::new(),
            group_count: DEFAULT_GROUP_COUNT,
            per_group_concurrency: DEFAULT_PER_GROUP_CONCURRENCY,
            max_browsers: DEFAULT_MAX_BROWSERS,
            max_pages_per_browser: DEFAULT_MAX_PAGES_PER_BROWSER,
            headless: true,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            pool_poll_interval: POOL_POLL_INTERVAL,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            stuck_cpu_threshold: STUCK_CPU_THRESHOLD,
            grace_period: DEFAULT_GRACE_PERIOD,
            restart_delay: DEFAULT_RESTART_DELAY,
            restart_cap: DEFAULT_RESTART_CAP,
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
            retry_budget: DEFAULT_RETRY_BUDGET,
            staleness_days: DEFAULT_STALENESS_DAYS,
            batch_size: 200,
            schedule_hours: vec![6, 12, 18],
            _phantom: PhantomData,
        }
    }
}

impl<State> FleetConfigBuilder<State> {
    fn transition<Next>(self) -> FleetConfigBuilder<Next> {
        FleetConfigBuilder {
            work_dir: self.work_dir,
            worker_command: self.worker_command,
            group_count: self.group_count,
            per_group_concurrency: self.per_group_concurrency,
            max_browsers: self.max_browsers,
            max_pages_per_browser: self.max_pages_per_browser,
            headless: self.headless,
            acquire_timeout: self.acquire_timeout,
            pool_poll_interval: self.pool_poll_interval,
            liveness_interval: self.liveness_interval,
            idle_threshold: self.idle_threshold,
            stuck_cpu_threshold: self.stuck_cpu_threshold,
            grace_period: self.grace_period,
            restart_delay: self.restart_delay,
            restart_cap: self.restart_cap,
            restart_cooldown: self.restart_cooldown,
            retry_budget: self.retry_budget,
            staleness_days: self.staleness_days,
            batch_size: self.batch_size,
            schedule_hours: self.schedule_hours,
            _phantom: PhantomData,
        }
    }

    #[must_use]
    pub fn group_count(mut self, count: usize) -> Self {
        self.group_count = count;
        self
    }

    #[must_use]
    pub fn per_group_concurrency(mut self, concurrency: usize) -> Self {
        self.per_group_concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn max_browsers(mut self, max: usize) -> Self {
        self.max_browsers = max;
        self
    }

    #[must_use]
    pub fn max_pages_per_browser(mut self, max: usize) -> Self {
        self.max_pages_per_browser = max;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_poll_interval(mut self, interval: Duration) -> Self {
        self.pool_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    #[must_use]
    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    #[must_use]
    pub fn stuck_cpu_threshold(mut self, percent: f32) -> Self {
        self.stuck_cpu_threshold = percent;
        self
    }

    #[must_use]
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    #[must_use]
    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    #[must_use]
    pub fn restart_cap(mut self, cap: u32) -> Self {
        self.restart_cap = cap;
        self
    }

    #[must_use]
    pub fn restart_cooldown(mut self, cooldown: Duration) -> Self {
        self.restart_cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    #[must_use]
    pub fn staleness_days(mut self, days: i64) -> Self {
        self.staleness_days = days;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    #[must_use]
    pub fn schedule_hours(mut self, hours: Vec<u32>) -> Self {
        self.schedule_hours = hours;
        self
    }
}

impl FleetConfigBuilder<()> {
    /// Set the root state directory (required)
    pub fn work_dir(mut self, dir: PathBuf) -> FleetConfigBuilder<WithWorkDir> {
        self.work_dir = Some(dir);
        self.transition()
    }
}

impl FleetConfigBuilder<WithWorkDir> {
    /// Set the worker launch command (required)
    pub fn worker_command<I, S>(mut self, command: I) -> FleetConfigBuilder<Complete>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_command = command.into_iter().map(Into::into).collect();
        self.transition()
    }
}

impl FleetConfigBuilder<Complete> {
    /// Validate and build the final configuration
    pub fn build(self) -> Result<FleetConfig> {
        let work_dir = self
            .work_dir
            .ok_or_else(|| anyhow!("work_dir missing despite typestate"))?;

        // Normalize to an absolute path so every store and log path derived
        // from it is stable regardless of the process working directory.
        let work_dir = if work_dir.is_absolute() {
            work_dir
        } else {
            std::env::current_dir()?.join(work_dir)
        };

        if self.worker_command.is_empty() {
            return Err(anyhow!("worker_command must contain at least a program name"));
        }
        if self.group_count == 0 || self.per_group_concurrency == 0 {
            return Err(anyhow!(
                "group_count and per_group_concurrency must be non-zero (cap = {} x {})",
                self.group_count,
                self.per_group_concurrency
            ));
        }
        if self.max_browsers == 0 {
            return Err(anyhow!("max_browsers must be non-zero"));
        }
        for hour in &self.schedule_hours {
            if *hour > 23 {
                return Err(anyhow!("schedule hour {hour} out of range 0-23"));
            }
        }

        Ok(FleetConfig {
            work_dir,
            worker_command: self.worker_command,
            group_count: self.group_count,
            per_group_concurrency: self.per_group_concurrency,
            max_browsers: self.max_browsers,
            max_pages_per_browser: self.max_pages_per_browser,
            headless: self.headless,
            acquire_timeout: self.acquire_timeout,
            pool_poll_interval: self.pool_poll_interval,
            liveness_interval: self.liveness_interval,
            idle_threshold: self.idle_threshold,
            stuck_cpu_threshold: self.stuck_cpu_threshold,
            grace_period: self.grace_period,
            restart_delay: self.restart_delay,
            restart_cap: self.restart_cap,
            restart_cooldown: self.restart_cooldown,
            retry_budget: self.retry_budget,
            staleness_days: self.staleness_days,
            batch_size: self.batch_size,
            schedule_hours: self.schedule_hours,
        })
    }
}

impl FleetConfig {
    /// Start building a configuration
    #[must_use]
    pub fn builder() -> FleetConfigBuilder<()> {
        FleetConfigBuilder::default()
    }
}

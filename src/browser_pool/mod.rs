//! Bounded pool of reusable headless-browser sessions
//!
//! Sessions are expensive to launch and flaky under reuse; the pool keeps a
//! small fixed set alive, hands them out with acquire/release semantics,
//! and evicts any session that stops responding. The pool is the system's
//! sole backpressure point: when every session is busy, `acquire` waits —
//! up to a bounded timeout — for a release, translating scrape demand into
//! bounded resource use.
//!
//! Capacity accounting follows one rule: every live session holds a
//! capacity permit from launch to eviction. Releasing a dead session drops
//! it (and its permit) instead of returning it to the idle set, so the pool
//! never leaks slots and never silently shrinks below its configured max.

pub mod capacity;
pub mod page_pool;

pub use capacity::CapacityGate;
pub use page_pool::{PageLease, PagePool};

use chromiumoxide::browser::Browser;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser_setup::launch_browser;
use crate::config::FleetConfig;
use crate::error::PoolError;
use crate::utils::constants::{
    DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_BROWSERS, DEFAULT_MAX_PAGES_PER_BROWSER,
    POOL_POLL_INTERVAL,
};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the browser pool
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Maximum concurrently live browser sessions
    pub max_browsers: usize,
    /// Maximum leased pages per session
    pub max_pages_per_browser: usize,
    /// Run sessions headless
    pub headless: bool,
    /// Bounded wait before `acquire` fails with `Exhausted`
    pub acquire_timeout: Duration,
    /// Poll interval while waiting for a handle
    pub poll_interval: Duration,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_browsers: DEFAULT_MAX_BROWSERS,
            max_pages_per_browser: DEFAULT_MAX_PAGES_PER_BROWSER,
            headless: true,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            poll_interval: POOL_POLL_INTERVAL,
        }
    }
}

impl From<&FleetConfig> for BrowserPoolConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            max_browsers: config.max_browsers(),
            max_pages_per_browser: config.max_pages_per_browser(),
            headless: config.headless(),
            acquire_timeout: config.acquire_timeout(),
            poll_interval: config.pool_poll_interval(),
        }
    }
}

// =============================================================================
// Pooled Session
// =============================================================================

/// A live browser session with its pool metadata
pub struct PooledBrowser {
    /// Unique identifier for this session
    pub id: u64,
    browser: Arc<Browser>,
    pages: Arc<PagePool>,
    handler: JoinHandle<()>,
    profile_dir: Option<PathBuf>,
    /// Capacity slot; freed when the session is dropped (evicted or torn down)
    _permit: OwnedSemaphorePermit,
    /// Last time this session was acquired or returned
    pub last_used: Instant,
}

impl PooledBrowser {
    /// Reference to the underlying browser
    #[must_use]
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// The page sub-pool for this session
    #[must_use]
    pub fn pages(&self) -> &Arc<PagePool> {
        &self.pages
    }

    fn cleanup_profile_dir(&mut self) {
        if let Some(path) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up profile directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for PooledBrowser {
    fn drop(&mut self) {
        self.handler.abort();
        self.cleanup_profile_dir();
    }
}

/// Point-in-time pool statistics for health reporting
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

// =============================================================================
// Browser Pool
// =============================================================================

/// Bounded pool of reusable browser sessions
pub struct BrowserPool {
    config: BrowserPoolConfig,
    /// Idle (ready) sessions
    idle: Mutex<VecDeque<PooledBrowser>>,
    /// Slot gate: one permit per live session
    gate: CapacityGate,
    next_id: AtomicU64,
}

impl BrowserPool {
    /// Create a new pool; sessions launch lazily on first acquire
    #[must_use]
    pub fn new(config: BrowserPoolConfig) -> Arc<Self> {
        let gate = CapacityGate::new(config.max_browsers);
        Arc::new(Self {
            config,
            idle: Mutex::new(VecDeque::new()),
            gate,
            next_id: AtomicU64::new(0),
        })
    }

    /// Acquire a session from the pool.
    ///
    /// Preference order: reuse an idle session (after a health probe), then
    /// lazily launch a new one while under max, then wait for a release.
    /// The wait is bounded: under sustained exhaustion this fails with
    /// [`PoolError::Exhausted`] rather than blocking forever.
    ///
    /// Launch failures propagate immediately — the pool never retries
    /// creation on the caller's behalf, so exhaustion is never silently
    /// masked by a crash-looping launch.
    pub async fn acquire(self: &Arc<Self>) -> Result<BrowserGuard, PoolError> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;

        loop {
            let candidate = self.idle.lock().await.pop_front();
            if let Some(mut session) = candidate {
                match session.browser.version().await {
                    Ok(_) => {
                        session.last_used = Instant::now();
                        debug!("Acquired browser {} from pool", session.id);
                        return Ok(BrowserGuard {
                            session: Some(session),
                            pool: Arc::clone(self),
                        });
                    }
                    Err(e) => {
                        warn!(
                            "Browser {} failed health probe during acquire, evicting: {}",
                            session.id, e
                        );
                        drop(session);
                        continue;
                    }
                }
            }

            if let Some(permit) = self.gate.try_reserve() {
                let session = self.launch_session(permit).await?;
                debug!("Launched browser {} for acquire (pool was empty)", session.id);
                return Ok(BrowserGuard {
                    session: Some(session),
                    pool: Arc::clone(self),
                });
            }

            if Instant::now() >= deadline {
                warn!(
                    "Browser pool exhausted: {} sessions busy for {:?}",
                    self.config.max_browsers,
                    started.elapsed()
                );
                return Err(PoolError::Exhausted {
                    waited_secs: self.config.acquire_timeout.as_secs(),
                    max: self.config.max_browsers,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn launch_session(&self, permit: OwnedSemaphorePermit) -> Result<PooledBrowser, PoolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let profile_dir =
            std::env::temp_dir().join(format!("fleetscrape_chrome_{}", uuid::Uuid::new_v4()));

        let (browser, handler) = launch_browser(self.config.headless, profile_dir.clone())
            .await
            .map_err(|e| PoolError::CreationFailed(format!("{e:#}")))?;

        let browser = Arc::new(browser);
        let pages = Arc::new(PagePool::new(
            id,
            self.config.max_pages_per_browser,
            self.config.poll_interval,
        ));

        info!("Browser session {id} launched");
        Ok(PooledBrowser {
            id,
            browser,
            pages,
            handler,
            profile_dir: Some(profile_dir),
            _permit: permit,
            last_used: Instant::now(),
        })
    }

    /// Return a session to the idle set, but only if it still responds.
    ///
    /// A session that fails the probe is evicted: dropped along with its
    /// capacity permit, so a future acquire can launch a replacement.
    fn release(self: &Arc<Self>, mut session: PooledBrowser) {
        session.last_used = Instant::now();
        let pool = Arc::clone(self);

        tokio::spawn(async move {
            match session.browser.version().await {
                Ok(_) => {
                    let id = session.id;
                    pool.idle.lock().await.push_back(session);
                    debug!("Released browser {id} back to pool");
                }
                Err(e) => {
                    warn!(
                        "Browser {} unusable at release, evicting: {}",
                        session.id, e
                    );
                    drop(session);
                }
            }
        });
    }

    /// Terminate every tracked session. Each individual close failure is
    /// caught and ignored so teardown always completes.
    pub async fn close_all(&self) {
        info!("Closing all pooled browser sessions");
        let mut idle = self.idle.lock().await;
        while let Some(mut session) = idle.pop_front() {
            session.pages.close_all().await;
            match Arc::get_mut(&mut session.browser) {
                Some(browser) => {
                    if let Err(e) = browser.close().await {
                        warn!("Ignoring close failure for browser {}: {}", session.id, e);
                    }
                    let _ = browser.wait().await;
                }
                None => {
                    warn!(
                        "Browser {} has outstanding references, skipping graceful close",
                        session.id
                    );
                }
            }
            drop(session);
        }
        info!("Browser pool teardown complete");
    }

    /// Current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().await.len();
        let live = self.gate.in_use();
        PoolStats {
            live,
            idle,
            in_use: live - idle,
            max: self.config.max_browsers,
        }
    }
}

// =============================================================================
// RAII Guard
// =============================================================================

/// RAII guard returning the session to the pool on drop
pub struct BrowserGuard {
    session: Option<PooledBrowser>,
    pool: Arc<BrowserPool>,
}

impl BrowserGuard {
    /// Reference to the underlying browser
    #[must_use]
    pub fn browser(&self) -> &Browser {
        self.session
            .as_ref()
            .expect("session present until drop")
            .browser()
    }

    /// Lease a page from this session's sub-pool
    pub async fn page(&self) -> Result<PageLease, PoolError> {
        let session = self.session.as_ref().expect("session present until drop");
        session
            .pages()
            .acquire(session.browser(), self.pool.config.acquire_timeout)
            .await
    }

    /// The session's pool id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.session.as_ref().expect("session present until drop").id
    }
}

impl Drop for BrowserGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

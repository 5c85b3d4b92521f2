//! Per-browser page sub-pool
//!
//! Each pooled browser owns a bounded set of reusable pages. Pages are
//! reset to `about:blank` between uses, and every page gets a standing
//! blocked-URL filter at creation so images, media, fonts and stylesheets
//! are never fetched — workers only need document content.
//!
//! Capacity counts *live* pages, idle or leased: a page carries its
//! capacity permit from creation to eviction, so evicting a dead page
//! frees its slot and the pool can never silently shrink below max.

use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{EnableParams, SetBlockedUrLsParams};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tracing::{debug, warn};

use super::capacity::CapacityGate;
use crate::error::PoolError;

/// URL patterns for heavy non-essential payloads, blocked on every page
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.bmp", "*.woff",
    "*.woff2", "*.ttf", "*.otf", "*.eot", "*.css", "*.mp4", "*.webm", "*.avi", "*.mp3", "*.wav",
];

/// A live page together with the capacity slot it occupies
struct LivePage {
    page: Page,
    permit: OwnedSemaphorePermit,
}

/// Bounded pool of reusable pages on one browser session.
///
/// Holds no reference to the browser itself; the owning session passes it
/// in at acquire time, which keeps teardown free of reference cycles.
pub struct PagePool {
    browser_id: u64,
    idle: Mutex<VecDeque<LivePage>>,
    gate: CapacityGate,
    poll_interval: Duration,
}

impl PagePool {
    #[must_use]
    pub fn new(browser_id: u64, max_pages: usize, poll_interval: Duration) -> Self {
        Self {
            browser_id,
            idle: Mutex::new(VecDeque::new()),
            gate: CapacityGate::new(max_pages),
            poll_interval,
        }
    }

    /// Acquire a page: reuse an idle one (after a state reset), create a
    /// new one under the per-browser cap, or wait up to `timeout` for a
    /// slot before failing with `Exhausted`.
    ///
    /// A reused page that fails its reset is evicted (slot freed) and the
    /// loop continues; creation failures propagate immediately.
    pub async fn acquire(
        self: &Arc<Self>,
        browser: &Browser,
        timeout: Duration,
    ) -> Result<PageLease, PoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let candidate = self.idle.lock().await.pop_front();
            if let Some(live) = candidate {
                match live.page.goto("about:blank").await {
                    Ok(_) => {
                        debug!("Reusing page on browser {}", self.browser_id);
                        return Ok(PageLease::new(live, Arc::clone(self)));
                    }
                    Err(e) => {
                        warn!(
                            "Evicting unusable page on browser {}: {}",
                            self.browser_id, e
                        );
                        drop(live);
                        continue;
                    }
                }
            }

            if let Some(permit) = self.gate.try_reserve() {
                let page = self.create_page(browser).await?;
                return Ok(PageLease::new(LivePage { page, permit }, Arc::clone(self)));
            }

            if Instant::now() >= deadline {
                return Err(PoolError::Exhausted {
                    waited_secs: timeout.as_secs(),
                    max: self.gate.max(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn create_page(&self, browser: &Browser) -> Result<Page, PoolError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PoolError::PageFailed {
                browser_id: self.browser_id,
                reason: e.to_string(),
            })?;

        // Standing resource filter: installed once, lives for the page
        page.execute(EnableParams::default())
            .await
            .map_err(|e| PoolError::PageFailed {
                browser_id: self.browser_id,
                reason: format!("network enable failed: {e}"),
            })?;
        let blocked: Vec<String> = BLOCKED_URL_PATTERNS.iter().map(ToString::to_string).collect();
        page.execute(SetBlockedUrLsParams::new(blocked))
            .await
            .map_err(|e| PoolError::PageFailed {
                browser_id: self.browser_id,
                reason: format!("blocked-URL filter failed: {e}"),
            })?;

        debug!("Created page on browser {}", self.browser_id);
        Ok(page)
    }

    /// Return a page to the idle set if it still responds, else evict it
    async fn release(&self, live: LivePage) {
        match live.page.url().await {
            Ok(_) => {
                self.idle.lock().await.push_back(live);
            }
            Err(e) => {
                warn!(
                    "Page on browser {} failed release probe, evicting: {}",
                    self.browser_id, e
                );
                drop(live);
            }
        }
    }

    /// Close every idle page; individual failures are ignored so teardown
    /// always completes
    pub async fn close_all(&self) {
        let mut idle = self.idle.lock().await;
        while let Some(live) = idle.pop_front() {
            if let Err(e) = live.page.close().await {
                debug!(
                    "Ignoring page close failure on browser {}: {}",
                    self.browser_id, e
                );
            }
        }
    }

    /// Live page count (idle + leased)
    #[must_use]
    pub fn live(&self) -> usize {
        self.gate.in_use()
    }
}

/// RAII lease over a pooled page; returns the page on drop
pub struct PageLease {
    live: Option<LivePage>,
    pool: Arc<PagePool>,
}

impl PageLease {
    fn new(live: LivePage, pool: Arc<PagePool>) -> Self {
        Self {
            live: Some(live),
            pool,
        }
    }

    /// The leased page
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.live.as_ref().expect("page present until drop").page
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.release(live).await;
            });
        }
    }
}

//! Persisted failure history and retry decisions
//!
//! The ledger is a single url→entry JSON mapping (`failed_urls.json`),
//! loaded fully at process start and flushed on mutation. It answers one
//! question: of everything that has ever failed, what should be dispatched
//! again?
//!
//! The ledger is written independently of the per-run record stores, and
//! other writers mark URLs done without telling it. [`RetryLedger::reconcile`]
//! exists for exactly that hazard: it promotes any pending entry that some
//! run store already recorded as a success.
//!
//! Reclassification passes ([`reconcile`](RetryLedger::reconcile),
//! [`sweep`](RetryLedger::sweep)) write a timestamped backup of the store
//! file before mutating it, so every cleanup is auditable and reversible.

mod classify;

pub use classify::{Classification, FailureReason, PermanentCause, classify};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::records::{RunStore, WorkStatus};
use crate::utils::normalize_url;

/// Ledger-side lifecycle of a failed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Eligible for the next dispatch batch
    PendingRetry,
    /// Currently handed to a worker; excluded from dispatch
    Processing,
    /// Promoted by reconciliation or a success report
    Succeeded,
    /// Terminal; never dispatched again
    PermanentFailed,
}

/// One URL's failure history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub url: String,
    pub status: LedgerStatus,
    pub reason: FailureReason,
    pub last_error: String,
    pub attempt_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
}

/// Counts reported by reclassification passes
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub promoted: usize,
    pub pending_before: usize,
    pub pending_after: usize,
}

/// Summary of a sweep pass over pending entries
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub total: usize,
    pub permanent: usize,
    pub retryable: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Persisted url→entry failure mapping
#[derive(Debug)]
pub struct RetryLedger {
    path: PathBuf,
    retry_budget: u32,
    staleness_days: i64,
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl RetryLedger {
    /// Load the ledger from disk.
    ///
    /// A missing file starts an empty ledger; an unparseable file is
    /// [`StoreError::Corrupted`] and must abort startup rather than mask
    /// data loss behind an empty state.
    pub async fn load(
        path: impl Into<PathBuf>,
        retry_budget: u32,
        staleness_days: i64,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<HashMap<String, LedgerEntry>>(&raw)
                .map_err(|e| StoreError::corrupted(&path, e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        info!("Retry ledger loaded: {} entries", entries.len());
        Ok(Self {
            path,
            retry_budget,
            staleness_days,
            entries: Mutex::new(entries),
        })
    }

    /// Record a failure report from a worker.
    ///
    /// Upserts by normalized URL, bumps the attempt count, and classifies
    /// immediately so terminal reasons go permanent on the first report.
    pub async fn record_failure(
        &self,
        url: &str,
        reason: FailureReason,
        message: &str,
    ) -> Result<(), StoreError> {
        let key = normalize_url(url);
        let now = Utc::now();
        {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(key).or_insert_with(|| LedgerEntry {
                url: url.to_string(),
                status: LedgerStatus::PendingRetry,
                reason,
                last_error: String::new(),
                attempt_count: 0,
                first_seen: now,
                last_attempt: now,
            });
            entry.attempt_count += 1;
            entry.last_attempt = now;
            entry.reason = reason;
            entry.last_error = message.to_string();
            entry.status = match classify(entry, self.retry_budget, self.staleness_days, now) {
                Classification::Retryable => LedgerStatus::PendingRetry,
                Classification::Permanent(cause) => {
                    warn!("{} permanently failed: {:?}", entry.url, cause);
                    LedgerStatus::PermanentFailed
                }
            };
        }
        self.flush().await
    }

    /// Record a success report, clearing the URL from the pending set
    pub async fn record_success(&self, url: &str) -> Result<(), StoreError> {
        let key = normalize_url(url);
        let mut changed = false;
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                if entry.status != LedgerStatus::Succeeded {
                    entry.status = LedgerStatus::Succeeded;
                    changed = true;
                }
            }
        }
        if changed { self.flush().await } else { Ok(()) }
    }

    /// Mark a dispatched batch as in flight so it is excluded from the
    /// next `export_pending_work` until its outcome arrives
    pub async fn mark_processing(&self, urls: &[String]) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.lock().await;
            for url in urls {
                if let Some(entry) = entries.get_mut(&normalize_url(url)) {
                    entry.status = LedgerStatus::Processing;
                }
            }
        }
        self.flush().await
    }

    /// Cross-reference pending entries against run-store success records.
    ///
    /// Any pending (or in-flight) entry whose normalized key appears as a
    /// success in any run is promoted to `Succeeded`. Idempotent: a second
    /// call with no new run state promotes nothing.
    pub async fn reconcile(&self, runs: &RunStore) -> Result<ReconcileReport, StoreError> {
        let mut done_keys: HashSet<String> = HashSet::new();
        for records in runs.load_all().await? {
            for (_, item) in records.with_status(WorkStatus::Success) {
                done_keys.insert(normalize_url(&item.url));
            }
        }

        self.backup().await?;

        let mut report = ReconcileReport::default();
        {
            let mut entries = self.entries.lock().await;
            report.pending_before = entries
                .values()
                .filter(|e| e.status == LedgerStatus::PendingRetry)
                .count();

            for (key, entry) in entries.iter_mut() {
                if matches!(
                    entry.status,
                    LedgerStatus::PendingRetry | LedgerStatus::Processing
                ) {
                    report.checked += 1;
                    if done_keys.contains(key) {
                        entry.status = LedgerStatus::Succeeded;
                        report.promoted += 1;
                    }
                }
            }

            report.pending_after = entries
                .values()
                .filter(|e| e.status == LedgerStatus::PendingRetry)
                .count();
        }

        info!(
            "Reconcile: {} checked, {} promoted, pending {} -> {}",
            report.checked, report.promoted, report.pending_before, report.pending_after
        );
        self.flush().await?;
        Ok(report)
    }

    /// Reclassify every pending entry, persisting permanent markings.
    ///
    /// This is the filter pass that keeps the queue clean: budget-exhausted
    /// and stale entries stop being re-exported forever.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.backup().await?;

        let now = Utc::now();
        let mut report = SweepReport::default();
        {
            let mut entries = self.entries.lock().await;
            for entry in entries.values_mut() {
                if entry.status != LedgerStatus::PendingRetry {
                    continue;
                }
                report.total += 1;
                match classify(entry, self.retry_budget, self.staleness_days, now) {
                    Classification::Retryable => report.retryable += 1,
                    Classification::Permanent(cause) => {
                        entry.status = LedgerStatus::PermanentFailed;
                        report.permanent += 1;
                        let category = match cause {
                            PermanentCause::TerminalReason(reason) => reason.to_string(),
                            PermanentCause::BudgetExhausted => "max_retries".to_string(),
                            PermanentCause::Stale => "stale".to_string(),
                        };
                        *report.by_category.entry(category).or_insert(0) += 1;
                    }
                }
            }
        }

        info!(
            "Sweep: {} pending analyzed, {} marked permanent, {} still retryable",
            report.total, report.permanent, report.retryable
        );
        self.flush().await?;
        Ok(report)
    }

    /// The next dispatch batch: retryable entries, excluding in-flight ones.
    ///
    /// Classification runs here too, so a caller that skipped `sweep` still
    /// never receives a budget-exhausted or stale URL.
    pub async fn export_pending_work(&self) -> Vec<String> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        let mut pending: Vec<String> = entries
            .values()
            .filter(|e| e.status == LedgerStatus::PendingRetry)
            .filter(|e| classify(e, self.retry_budget, self.staleness_days, now).is_retryable())
            .map(|e| e.url.clone())
            .collect();
        pending.sort();
        pending
    }

    /// Snapshot of entries for reporting (sorted by URL)
    pub async fn snapshot(&self) -> Vec<LedgerEntry> {
        let entries = self.entries.lock().await;
        let mut all: Vec<LedgerEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.url.cmp(&b.url));
        all
    }

    /// Count of entries per status
    pub async fn status_counts(&self) -> BTreeMap<String, usize> {
        let entries = self.entries.lock().await;
        let mut counts = BTreeMap::new();
        for entry in entries.values() {
            let label = match entry.status {
                LedgerStatus::PendingRetry => "pending_retry",
                LedgerStatus::Processing => "processing",
                LedgerStatus::Succeeded => "succeeded",
                LedgerStatus::PermanentFailed => "permanent_failed",
            };
            *counts.entry(label.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Copy the current store file aside with a timestamp suffix.
    ///
    /// No-op when the store has never been written.
    async fn backup(&self) -> Result<(), StoreError> {
        match tokio::fs::try_exists(&self.path).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        }
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let backup_path = backup_file_name(&self.path, &stamp.to_string());
        tokio::fs::copy(&self.path, &backup_path)
            .await
            .map_err(|e| StoreError::io(&backup_path, e))?;
        debug!("Ledger backed up to {}", backup_path.display());
        Ok(())
    }

    /// Write the full mapping back to disk
    async fn flush(&self) -> Result<(), StoreError> {
        let json = {
            let entries = self.entries.lock().await;
            serde_json::to_string_pretty(&*entries)
                .map_err(|e| StoreError::corrupted(&self.path, e.to_string()))?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

fn backup_file_name(path: &Path, stamp: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "ledger".to_string(), |n| n.to_string_lossy().to_string());
    path.with_file_name(format!("{file_name}.backup_{stamp}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger_in(dir: &Path) -> RetryLedger {
        RetryLedger::load(dir.join("failed_urls.json"), 3, 7)
            .await
            .expect("load")
    }

    #[tokio::test]
    async fn test_record_failure_upserts_by_normalized_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(dir.path()).await;

        ledger
            .record_failure("https://www.x.com/a/", FailureReason::UpstreamTimeout, "Timeout 30s exceeded")
            .await
            .expect("record");
        ledger
            .record_failure("http://x.com/a", FailureReason::UpstreamTimeout, "Timeout 30s exceeded")
            .await
            .expect("record");

        let all = ledger.snapshot().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].attempt_count, 2);
    }

    #[tokio::test]
    async fn test_terminal_reason_goes_permanent_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(dir.path()).await;

        ledger
            .record_failure("https://x.com/missing", FailureReason::NotFound, "HTTP 404")
            .await
            .expect("record");

        assert!(ledger.export_pending_work().await.is_empty());
        let all = ledger.snapshot().await;
        assert_eq!(all[0].status, LedgerStatus::PermanentFailed);
    }

    #[tokio::test]
    async fn test_budget_removes_from_pending_after_third_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(dir.path()).await;
        let url = "https://x.com/flaky";

        for _ in 0..2 {
            ledger
                .record_failure(url, FailureReason::UpstreamTimeout, "Timeout exceeded")
                .await
                .expect("record");
        }
        assert_eq!(ledger.export_pending_work().await, vec![url.to_string()]);

        ledger
            .record_failure(url, FailureReason::UpstreamTimeout, "Timeout exceeded")
            .await
            .expect("record");
        assert!(ledger.export_pending_work().await.is_empty());
    }

    #[tokio::test]
    async fn test_processing_excluded_from_export() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(dir.path()).await;
        let url = "https://x.com/inflight".to_string();

        ledger
            .record_failure(&url, FailureReason::UpstreamTimeout, "Timeout exceeded")
            .await
            .expect("record");
        ledger.mark_processing(&[url.clone()]).await.expect("mark");
        assert!(ledger.export_pending_work().await.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_promotes_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runs = RunStore::new(dir.path().join("runs"));
        let ledger = ledger_in(dir.path()).await;

        ledger
            .record_failure("https://www.x.com/done/", FailureReason::UpstreamTimeout, "Timeout")
            .await
            .expect("record");
        ledger
            .record_failure("https://x.com/still-broken", FailureReason::UpstreamTimeout, "Timeout")
            .await
            .expect("record");

        // Independent writer recorded the first URL as done, under a
        // different surface form of the same key.
        let mut records = crate::records::RunRecords::new("2025-08-01");
        let seq = records.append("http://x.com/done");
        records.mark(seq, WorkStatus::Success, None);
        runs.save(&records).await.expect("save");

        let first = ledger.reconcile(&runs).await.expect("reconcile");
        assert_eq!(first.promoted, 1);
        assert_eq!(first.pending_after, 1);

        let second = ledger.reconcile(&runs).await.expect("reconcile");
        assert_eq!(second.promoted, 0);
        assert_eq!(second.pending_after, 1);

        assert_eq!(
            ledger.export_pending_work().await,
            vec!["https://x.com/still-broken".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reclassification_writes_timestamped_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = ledger_in(dir.path()).await;
        ledger
            .record_failure("https://x.com/a", FailureReason::UpstreamTimeout, "Timeout")
            .await
            .expect("record");

        ledger.sweep().await.expect("sweep");

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("failed_urls.json.backup_")
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_ledger_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("failed_urls.json");
        std::fs::write(&path, "][").expect("write");

        let err = RetryLedger::load(&path, 3, 7).await.expect_err("must fail");
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}

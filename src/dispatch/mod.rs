//! Batch assembly and dispatch
//!
//! The pipeline from candidate URLs to supervised workers: candidates are
//! filtered through the dedup index, the ledger's pending-retry set is
//! merged in, the batch is capped and partitioned round-robin into one
//! file per worker group, and the supervisor launches a group per file.
//!
//! The global concurrency cap is enforced here structurally: there are
//! exactly `group_count` partitions and each worker has a fixed internal
//! concurrency, so in-flight work can never exceed
//! `group_count × per_group_concurrency` no matter how large the batch is.
//!
//! This module also hosts the operational entry points ("list pending
//! failures", "reconcile ledger", "dispatch retry batch", "start
//! supervised run"). Each returns a human-readable summary plus the
//! machine-readable pending list, so every operation is auditable.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::dedup_index::DedupIndex;
use crate::records::{RunStore, WorkStatus};
use crate::retry_ledger::RetryLedger;
use crate::supervisor::{GroupSpec, Supervisor};
use crate::utils::constants::STALE_PROCESSING_AGE;
use crate::utils::{is_valid_url, normalize_url};

/// An assembled dispatch batch
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub items: Vec<String>,
    pub skipped_duplicates: usize,
    pub merged_retries: usize,
    pub recovered_stale: usize,
}

/// Result of an operational entry point
#[derive(Debug, Clone, Serialize)]
pub struct OpReport {
    /// Human-readable summary
    pub summary: String,
    /// Machine-readable pending-work list after the operation
    pub pending: Vec<String>,
}

/// Assembles batches from candidates, the dedup index and the ledger
pub struct Dispatcher {
    config: FleetConfig,
    dedup: Arc<DedupIndex>,
    ledger: Arc<RetryLedger>,
    runs: Arc<RunStore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: FleetConfig,
        dedup: Arc<DedupIndex>,
        ledger: Arc<RetryLedger>,
        runs: Arc<RunStore>,
    ) -> Self {
        Self {
            config,
            dedup,
            ledger,
            runs,
        }
    }

    /// Assemble the next batch: dedup-filter the candidates, merge the
    /// ledger's pending-retry set and recovered stale-processing items,
    /// and cap at the configured batch size.
    ///
    /// New items are appended to today's run records as `pending`; ledger
    /// entries entering the batch are marked `processing` so they are not
    /// exported twice.
    pub async fn assemble_batch(&self, candidates: Vec<String>) -> Result<Batch> {
        self.dedup
            .build()
            .await
            .context("Failed to build dedup index")?;

        let valid: Vec<String> = candidates
            .into_iter()
            .filter(|url| {
                let ok = is_valid_url(url);
                if !ok {
                    warn!("Dropping invalid candidate URL: {url}");
                }
                ok
            })
            .collect();

        let check = self.dedup.check_batch(&valid).await;
        let skipped_duplicates = check.duplicates.len();
        for dupe in &check.duplicates {
            info!(
                "Skipping {} — already completed at {:?}",
                dupe.url,
                dupe.locations.first()
            );
        }

        // Items a dead worker left in `processing` come back first
        let stale = self.runs.stale_processing(STALE_PROCESSING_AGE).await?;
        let mut recovered_stale = 0;
        for (location, _) in &stale {
            let mut records = self.runs.load(&location.run_id).await?;
            if records.mark(location.seq, WorkStatus::Pending, None) {
                self.runs.save(&records).await?;
                recovered_stale += 1;
            }
        }

        let retries = self.ledger.export_pending_work().await;
        let merged_retries = retries.len();

        // Merge, fresh candidates first, dedup by normalized key
        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::new();
        for url in check
            .unique
            .into_iter()
            .chain(stale.into_iter().map(|(_, url)| url))
            .chain(retries)
        {
            if seen.insert(normalize_url(&url)) {
                items.push(url);
            }
        }
        items.truncate(self.config.batch_size());

        // Record discoveries in today's run and mark ledger entries in flight
        let mut today = self.runs.load(&RunStore::today_run_id()).await?;
        let existing: HashSet<String> = today
            .items
            .values()
            .map(|item| normalize_url(&item.url))
            .collect();
        for url in &items {
            if !existing.contains(&normalize_url(url)) {
                today.append(url.clone());
            }
        }
        self.runs.save(&today).await?;
        self.ledger.mark_processing(&items).await?;

        info!(
            "Batch assembled: {} items ({} duplicates skipped, {} retries merged, {} stale recovered)",
            items.len(),
            skipped_duplicates,
            merged_retries,
            recovered_stale
        );
        Ok(Batch {
            items,
            skipped_duplicates,
            merged_retries,
            recovered_stale,
        })
    }

    /// Write the batch round-robin into one partition file per group.
    ///
    /// Groups with no items are omitted: an empty partition would spawn a
    /// worker with nothing to do.
    pub async fn partition(&self, batch: &Batch) -> Result<Vec<GroupSpec>> {
        let dir = self.config.partitions_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .context("Failed to create partitions directory")?;

        let group_count = self.config.group_count();
        let mut partitions: Vec<Vec<&str>> = vec![Vec::new(); group_count];
        for (i, url) in batch.items.iter().enumerate() {
            partitions[i % group_count].push(url.as_str());
        }

        let mut specs = Vec::new();
        for (i, urls) in partitions.iter().enumerate() {
            if urls.is_empty() {
                continue;
            }
            let name = format!("group-{}", i + 1);
            let path = dir.join(format!("{name}.txt"));
            tokio::fs::write(&path, urls.join("\n"))
                .await
                .with_context(|| format!("Failed to write partition {}", path.display()))?;
            specs.push(GroupSpec {
                name,
                partition_file: path,
            });
        }

        info!(
            "Partitioned {} items into {} groups (cap {})",
            batch.items.len(),
            specs.len(),
            self.config.global_concurrency_cap()
        );
        Ok(specs)
    }

    // =========================================================================
    // Operational entry points
    // =========================================================================

    /// List pending failures with classification counts.
    ///
    /// `days` restricts the listing to entries attempted within that many
    /// days; `None` lists everything.
    pub async fn list_pending_failures(&self, days: Option<i64>) -> Result<OpReport> {
        let counts = self.ledger.status_counts().await;
        let mut pending = self.ledger.export_pending_work().await;

        if let Some(days) = days {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            let recent: HashSet<String> = self
                .ledger
                .snapshot()
                .await
                .into_iter()
                .filter(|entry| entry.last_attempt >= cutoff)
                .map(|entry| entry.url)
                .collect();
            pending.retain(|url| recent.contains(url));
        }

        let mut summary = format!("{} URLs pending retry\n", pending.len());
        for (status, count) in &counts {
            summary.push_str(&format!("  {status}: {count}\n"));
        }
        Ok(OpReport { summary, pending })
    }

    /// Reconcile the ledger against run-store success records, then sweep
    /// permanents out of the pending set
    pub async fn reconcile_ledger(&self) -> Result<OpReport> {
        let reconcile = self.ledger.reconcile(&self.runs).await?;
        let sweep = self.ledger.sweep().await?;
        let pending = self.ledger.export_pending_work().await;

        let mut summary = format!(
            "Reconcile: {} checked, {} promoted to success, pending {} -> {}\n\
             Sweep: {} analyzed, {} marked permanent, {} retryable\n",
            reconcile.checked,
            reconcile.promoted,
            reconcile.pending_before,
            reconcile.pending_after,
            sweep.total,
            sweep.permanent,
            sweep.retryable,
        );
        for (category, count) in &sweep.by_category {
            summary.push_str(&format!("  {category}: {count}\n"));
        }
        Ok(OpReport { summary, pending })
    }

    /// Assemble and partition a batch of retries only (no new candidates)
    pub async fn dispatch_retry_batch(&self) -> Result<(OpReport, Vec<GroupSpec>)> {
        let batch = self.assemble_batch(Vec::new()).await?;
        let specs = self.partition(&batch).await?;
        let summary = format!(
            "Dispatching {} retries across {} groups ({} stale recovered)\n",
            batch.items.len(),
            specs.len(),
            batch.recovered_stale,
        );
        let pending = batch.items;
        Ok((OpReport { summary, pending }, specs))
    }

    /// Full supervised run: assemble from candidates, partition, and hand
    /// the groups to the supervisor
    pub async fn start_supervised_run(
        &self,
        candidates: Vec<String>,
        supervisor: &Supervisor,
    ) -> Result<OpReport> {
        let batch = self.assemble_batch(candidates).await?;
        if batch.items.is_empty() {
            return Ok(OpReport {
                summary: "Nothing to dispatch: all candidates filtered".to_string(),
                pending: Vec::new(),
            });
        }

        let specs = self.partition(&batch).await?;
        let group_count = specs.len();
        supervisor
            .start_groups(specs)
            .await
            .context("Failed to start worker groups")?;

        let summary = format!(
            "Supervised run started: {} items in {} groups ({} duplicates skipped, {} retries merged)\n",
            batch.items.len(),
            group_count,
            batch.skipped_duplicates,
            batch.merged_retries,
        );
        Ok(OpReport {
            summary,
            pending: batch.items,
        })
    }
}

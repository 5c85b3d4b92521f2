//! Per-run record store
//!
//! One JSON collection per processing run (keyed by run date), holding a
//! sequence-id → work item map: `<work_dir>/runs/<YYYY-MM-DD>/records.json`.
//! Collections are bounded (a few thousand entries), so persistence is
//! load-all / mutate / write-all.
//!
//! Run records are the authoritative source of *success*: the dedup index
//! is rebuilt from them and the retry ledger reconciles against them.
//! A file that exists but cannot be parsed is a startup-fatal condition —
//! proceeding with empty state would silently re-process completed work.

use chrono::{DateTime, Local, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;

lazy_static! {
    static ref RUN_ID_RE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex");
}

/// Lifecycle state of a work item.
///
/// `Success` and `FailedPermanent` are terminal; `FailedTransient` returns
/// to `Pending` on the next dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Processing,
    Success,
    FailedTransient,
    FailedPermanent,
}

impl WorkStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::FailedPermanent)
    }
}

/// A unit of work, identified by its normalized URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    pub status: WorkStatus,
    #[serde(default)]
    pub attempt_count: u32,
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkItem {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: WorkStatus::Pending,
            attempt_count: 0,
            first_seen: Utc::now(),
            last_attempt: None,
            last_error: None,
        }
    }
}

/// Where a record lives: which run, which sequence id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocation {
    pub run_id: String,
    pub seq: u64,
}

/// One run's record collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecords {
    pub run_id: String,
    #[serde(default)]
    pub items: BTreeMap<u64, WorkItem>,
}

impl RunRecords {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            items: BTreeMap::new(),
        }
    }

    /// Append a new pending item, returning its sequence id
    pub fn append(&mut self, url: impl Into<String>) -> u64 {
        let seq = self.items.keys().next_back().map_or(1, |last| last + 1);
        self.items.insert(seq, WorkItem::new(url));
        seq
    }

    /// Update the status of an existing record
    pub fn mark(&mut self, seq: u64, status: WorkStatus, error: Option<String>) -> bool {
        match self.items.get_mut(&seq) {
            Some(item) => {
                item.status = status;
                item.last_attempt = Some(Utc::now());
                if matches!(
                    status,
                    WorkStatus::Processing | WorkStatus::FailedTransient | WorkStatus::FailedPermanent
                ) {
                    item.attempt_count += 1;
                }
                if let Some(err) = error {
                    item.last_error = Some(err);
                }
                true
            }
            None => false,
        }
    }

    /// Iterate items with a given status
    pub fn with_status(&self, status: WorkStatus) -> impl Iterator<Item = (&u64, &WorkItem)> {
        self.items.iter().filter(move |(_, item)| item.status == status)
    }
}

/// Store of all per-run record collections under a runs directory
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    /// Open the store rooted at the given runs directory (created lazily)
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run id for today's run (local date, matching on-disk layout)
    #[must_use]
    pub fn today_run_id() -> String {
        Local::now().format("%Y-%m-%d").to_string()
    }

    fn records_path(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id).join("records.json")
    }

    /// List all run ids on disk, sorted ascending.
    ///
    /// Only directories matching the `YYYY-MM-DD` shape are runs; anything
    /// else in the tree is ignored.
    pub async fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        let mut runs = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if RUN_ID_RE.is_match(&name) {
                runs.push(name);
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Load one run's records. A missing file is an empty run, not an error;
    /// an unparseable file is [`StoreError::Corrupted`] and must abort startup.
    pub async fn load(&self, run_id: &str) -> Result<RunRecords, StoreError> {
        let path = self.records_path(run_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No records for run {run_id}, starting empty");
                return Ok(RunRecords::new(run_id));
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let items: BTreeMap<u64, WorkItem> =
            serde_json::from_str(&raw).map_err(|e| StoreError::corrupted(&path, e.to_string()))?;
        Ok(RunRecords {
            run_id: run_id.to_string(),
            items,
        })
    }

    /// Write one run's records back in full
    pub async fn save(&self, records: &RunRecords) -> Result<(), StoreError> {
        let path = self.records_path(&records.run_id);
        let parent = path.parent().expect("records path always has a parent");
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
        let json = serde_json::to_string_pretty(&records.items)
            .map_err(|e| StoreError::corrupted(&path, e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    /// Load every run on disk. Any corrupted collection aborts the whole load.
    pub async fn load_all(&self) -> Result<Vec<RunRecords>, StoreError> {
        let mut all = Vec::new();
        for run_id in self.list_runs().await? {
            all.push(self.load(&run_id).await?);
        }
        Ok(all)
    }

    /// Find items stuck in `processing` for longer than `max_age`.
    ///
    /// A worker that died mid-item leaves `processing` behind; anything
    /// older than the threshold is treated as interrupted and eligible for
    /// re-dispatch.
    pub async fn stale_processing(
        &self,
        max_age: Duration,
    ) -> Result<Vec<(RecordLocation, String)>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut stale = Vec::new();
        for records in self.load_all().await? {
            for (seq, item) in records.with_status(WorkStatus::Processing) {
                let marker = item.last_attempt.unwrap_or(item.first_seen);
                if marker < cutoff {
                    warn!(
                        "Stale processing record {}#{} ({}), last touched {}",
                        records.run_id, seq, item.url, marker
                    );
                    stale.push((
                        RecordLocation {
                            run_id: records.run_id.clone(),
                            seq: *seq,
                        },
                        item.url.clone(),
                    ));
                }
            }
        }
        Ok(stale)
    }
}

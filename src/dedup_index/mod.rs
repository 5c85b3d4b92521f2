//! Global dedup index over completed work
//!
//! Maps normalized URLs to every run record location where that URL was
//! successfully processed, across all historical runs. Candidates are
//! checked against the index before dispatch so no document is fetched and
//! rewritten twice.
//!
//! The index is rebuilt from scratch from the per-run record stores every
//! time it is (re)loaded; it never persists its own state, so it can never
//! drift from the records it summarizes.

use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::records::{RecordLocation, RunStore, WorkStatus};
use crate::utils::normalize_url;

/// Result of checking one URL against the index
#[derive(Debug, Clone)]
pub struct UrlCheck {
    pub exists: bool,
    pub locations: Vec<RecordLocation>,
}

/// One duplicate found during a batch check
#[derive(Debug, Clone)]
pub struct DuplicateHit {
    pub url: String,
    pub key: String,
    pub locations: Vec<RecordLocation>,
}

/// Result of checking a candidate batch: what to dispatch, what to skip
#[derive(Debug, Clone)]
pub struct BatchCheck {
    pub unique: Vec<String>,
    pub duplicates: Vec<DuplicateHit>,
}

/// Occurrence map from normalized URL to completed record locations
pub struct DedupIndex {
    store: Arc<RunStore>,
    entries: RwLock<HashMap<String, Vec<RecordLocation>>>,
}

impl DedupIndex {
    /// Create an empty index over the given run store. Call [`build`](Self::build)
    /// before checking anything.
    #[must_use]
    pub fn new(store: Arc<RunStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the occurrence map from every persisted run.
    ///
    /// Idempotent: the map is replaced wholesale, so rerunning after new
    /// runs appear simply picks them up. Only `success` records count as
    /// occurrences; failures are the retry ledger's concern.
    pub async fn build(&self) -> Result<usize, StoreError> {
        let mut fresh: HashMap<String, Vec<RecordLocation>> = HashMap::new();
        let runs = self.store.load_all().await?;
        for records in &runs {
            for (seq, item) in records.with_status(WorkStatus::Success) {
                let key = normalize_url(&item.url);
                fresh.entry(key).or_default().push(RecordLocation {
                    run_id: records.run_id.clone(),
                    seq: *seq,
                });
            }
        }

        let total = fresh.len();
        info!(
            "Dedup index built: {total} unique keys from {} runs",
            runs.len()
        );
        *self.entries.write().await = fresh;
        Ok(total)
    }

    /// Check one URL. `exists` is true if any prior run completed it.
    pub async fn check_url(&self, url: &str) -> UrlCheck {
        let key = normalize_url(url);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(locations) => UrlCheck {
                exists: true,
                locations: locations.clone(),
            },
            None => UrlCheck {
                exists: false,
                locations: Vec::new(),
            },
        }
    }

    /// Partition a candidate batch into unseen URLs and known duplicates.
    ///
    /// Duplicates within the batch itself also collapse: the first
    /// occurrence of a key stays unique, later ones are reported with the
    /// locations already known (possibly none, for intra-batch repeats).
    pub async fn check_batch(&self, urls: &[String]) -> BatchCheck {
        let entries = self.entries.read().await;
        let mut seen_in_batch: HashSet<String> = HashSet::new();
        let mut unique = Vec::new();
        let mut duplicates = Vec::new();

        for url in urls {
            let key = normalize_url(url);
            let known = entries.get(&key);
            if known.is_some() || seen_in_batch.contains(&key) {
                duplicates.push(DuplicateHit {
                    url: url.clone(),
                    key,
                    locations: known.cloned().unwrap_or_default(),
                });
            } else {
                seen_in_batch.insert(key);
                unique.push(url.clone());
            }
        }

        debug!(
            "Batch check: {} candidates, {} unique, {} duplicates",
            urls.len(),
            unique.len(),
            duplicates.len()
        );
        BatchCheck { unique, duplicates }
    }

    /// Diagnostic full self-scan: keys completed more than once.
    ///
    /// Steady state is an empty result; anything here means an upstream
    /// generator dispatched a URL that was already done.
    pub async fn find_all_duplicates(&self) -> Vec<(String, Vec<RecordLocation>)> {
        let entries = self.entries.read().await;
        let mut dupes: Vec<(String, Vec<RecordLocation>)> = entries
            .iter()
            .filter(|(_, locations)| locations.len() > 1)
            .map(|(key, locations)| (key.clone(), locations.clone()))
            .collect();
        dupes.sort_by(|a, b| a.0.cmp(&b.0));
        dupes
    }

    /// Number of unique keys currently indexed
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the index currently holds no keys
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

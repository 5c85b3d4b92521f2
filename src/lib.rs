pub mod browser_pool;
pub mod browser_setup;
pub mod config;
pub mod daemon;
pub mod dedup_index;
pub mod dispatch;
pub mod error;
pub mod records;
pub mod retry_ledger;
pub mod supervisor;
pub mod utils;

pub use browser_pool::{BrowserGuard, BrowserPool, BrowserPoolConfig, PageLease, PoolStats};
pub use browser_setup::{download_managed_browser, find_browser_executable, launch_browser};
pub use config::FleetConfig;
pub use daemon::Daemon;
pub use dedup_index::{BatchCheck, DedupIndex, UrlCheck};
pub use dispatch::{Batch, Dispatcher, OpReport};
pub use error::{PoolError, StoreError, WorkerError};
pub use records::{RecordLocation, RunRecords, RunStore, WorkItem, WorkStatus};
pub use retry_ledger::{
    Classification, FailureReason, LedgerEntry, LedgerStatus, PermanentCause, ReconcileReport,
    RetryLedger, SweepReport,
};
pub use supervisor::{
    GroupSpec, GroupStatus, LivenessProbe, ProcessSpawner, Supervisor, SupervisorConfig,
    SysinfoProbe, WorkerRecord, WorkerStatus,
};
pub use utils::{extract_domain, is_valid_url, normalize_url};

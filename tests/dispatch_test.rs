//! Batch assembly and partitioning tests

use std::sync::Arc;

use fleetscrape::{
    DedupIndex, Dispatcher, FailureReason, FleetConfig, RetryLedger, RunRecords, RunStore,
    WorkStatus,
};

async fn dispatcher_in(dir: &std::path::Path) -> (Dispatcher, Arc<RetryLedger>, Arc<RunStore>) {
    let config = FleetConfig::builder()
        .work_dir(dir.to_path_buf())
        .worker_command(["scrape-worker"])
        .group_count(3)
        .batch_size(50)
        .build()
        .expect("config");

    let runs = Arc::new(RunStore::new(config.runs_dir()));
    let ledger = Arc::new(
        RetryLedger::load(config.ledger_path(), 3, 7)
            .await
            .expect("ledger"),
    );
    let dedup = Arc::new(DedupIndex::new(Arc::clone(&runs)));
    let dispatcher = Dispatcher::new(config, dedup, Arc::clone(&ledger), Arc::clone(&runs));
    (dispatcher, ledger, runs)
}

#[tokio::test]
async fn test_assemble_filters_duplicates_and_merges_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (dispatcher, ledger, runs) = dispatcher_in(dir.path()).await;

    // One URL already completed in a prior run
    let mut prior = RunRecords::new("2025-07-01");
    let seq = prior.append("https://a.com/done");
    prior.mark(seq, WorkStatus::Success, None);
    runs.save(&prior).await.expect("save");

    // One URL pending retry in the ledger
    ledger
        .record_failure("https://a.com/retry", FailureReason::UpstreamTimeout, "Timeout")
        .await
        .expect("record");

    let batch = dispatcher
        .assemble_batch(vec![
            "https://a.com/new".to_string(),
            "https://www.a.com/done/".to_string(), // dedup hit
            "not a url".to_string(),               // dropped
        ])
        .await
        .expect("assemble");

    assert_eq!(batch.skipped_duplicates, 1);
    assert_eq!(batch.merged_retries, 1);
    assert_eq!(
        batch.items,
        vec!["https://a.com/new".to_string(), "https://a.com/retry".to_string()]
    );

    // Dispatched retries are in flight, not pending
    assert!(ledger.export_pending_work().await.is_empty());
}

#[tokio::test]
async fn test_assemble_recovers_stale_processing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (dispatcher, _ledger, runs) = dispatcher_in(dir.path()).await;

    let mut prior = RunRecords::new("2025-07-02");
    let seq = prior.append("https://a.com/interrupted");
    prior.mark(seq, WorkStatus::Processing, None);
    if let Some(item) = prior.items.get_mut(&seq) {
        item.last_attempt = Some(chrono::Utc::now() - chrono::Duration::hours(3));
    }
    runs.save(&prior).await.expect("save");

    let batch = dispatcher.assemble_batch(Vec::new()).await.expect("assemble");
    assert_eq!(batch.recovered_stale, 1);
    assert_eq!(batch.items, vec!["https://a.com/interrupted".to_string()]);

    // The run record is back to pending for the next outcome report
    let reloaded = runs.load("2025-07-02").await.expect("load");
    assert_eq!(reloaded.items[&seq].status, WorkStatus::Pending);
}

#[tokio::test]
async fn test_partition_is_round_robin_over_groups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (dispatcher, _ledger, _runs) = dispatcher_in(dir.path()).await;

    let urls: Vec<String> = (0..7).map(|i| format!("https://a.com/{i}")).collect();
    let batch = dispatcher.assemble_batch(urls).await.expect("assemble");
    let specs = dispatcher.partition(&batch).await.expect("partition");

    // 7 items over 3 groups: 3 + 2 + 2
    assert_eq!(specs.len(), 3);
    let mut sizes = Vec::new();
    for spec in &specs {
        let contents = std::fs::read_to_string(&spec.partition_file).expect("partition file");
        sizes.push(contents.lines().count());
    }
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 2, 3]);
}

#[tokio::test]
async fn test_partition_omits_empty_groups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (dispatcher, _ledger, _runs) = dispatcher_in(dir.path()).await;

    let batch = dispatcher
        .assemble_batch(vec!["https://a.com/only".to_string()])
        .await
        .expect("assemble");
    let specs = dispatcher.partition(&batch).await.expect("partition");
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].name, "group-1");
}

#[tokio::test]
async fn test_batch_size_cap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = FleetConfig::builder()
        .work_dir(dir.path().to_path_buf())
        .worker_command(["scrape-worker"])
        .batch_size(3)
        .build()
        .expect("config");
    let runs = Arc::new(RunStore::new(config.runs_dir()));
    let ledger = Arc::new(
        RetryLedger::load(config.ledger_path(), 3, 7)
            .await
            .expect("ledger"),
    );
    let dedup = Arc::new(DedupIndex::new(Arc::clone(&runs)));
    let dispatcher = Dispatcher::new(config, dedup, ledger, runs);

    let urls: Vec<String> = (0..10).map(|i| format!("https://a.com/{i}")).collect();
    let batch = dispatcher.assemble_batch(urls).await.expect("assemble");
    assert_eq!(batch.items.len(), 3);
}

#[tokio::test]
async fn test_pending_failures_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (dispatcher, ledger, _runs) = dispatcher_in(dir.path()).await;

    ledger
        .record_failure("https://a.com/r1", FailureReason::UpstreamTimeout, "Timeout")
        .await
        .expect("record");
    ledger
        .record_failure("https://a.com/gone", FailureReason::NotFound, "HTTP 404")
        .await
        .expect("record");

    let report = dispatcher
        .list_pending_failures(None)
        .await
        .expect("report");
    assert_eq!(report.pending, vec!["https://a.com/r1".to_string()]);
    assert!(report.summary.contains("1 URLs pending retry"));
    assert!(report.summary.contains("permanent_failed: 1"));

    // A zero-day window excludes nothing attempted just now
    let recent = dispatcher
        .list_pending_failures(Some(1))
        .await
        .expect("report");
    assert_eq!(recent.pending.len(), 1);
}

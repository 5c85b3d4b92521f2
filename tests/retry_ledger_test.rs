//! End-to-end tests for the retry ledger lifecycle

use std::sync::Arc;

use fleetscrape::{FailureReason, LedgerStatus, RetryLedger, RunRecords, RunStore, WorkStatus};

#[tokio::test]
async fn test_two_timeouts_stay_pending_third_goes_permanent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = RetryLedger::load(dir.path().join("failed_urls.json"), 3, 7)
        .await
        .expect("load");
    let url = "https://x.com/flaky";

    ledger
        .record_failure(url, FailureReason::UpstreamTimeout, "Timeout 30000ms exceeded")
        .await
        .expect("record");
    ledger
        .record_failure(url, FailureReason::UpstreamTimeout, "Timeout 30000ms exceeded")
        .await
        .expect("record");
    assert_eq!(ledger.export_pending_work().await, vec![url.to_string()]);

    ledger
        .record_failure(url, FailureReason::UpstreamTimeout, "Timeout 30000ms exceeded")
        .await
        .expect("record");
    assert!(ledger.export_pending_work().await.is_empty());
}

#[tokio::test]
async fn test_ledger_survives_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("failed_urls.json");

    {
        let ledger = RetryLedger::load(&path, 3, 7).await.expect("load");
        ledger
            .record_failure("https://x.com/a", FailureReason::UpstreamTimeout, "Timeout")
            .await
            .expect("record");
    }

    let reloaded = RetryLedger::load(&path, 3, 7).await.expect("reload");
    let all = reloaded.snapshot().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, LedgerStatus::PendingRetry);
    assert_eq!(all[0].attempt_count, 1);
}

#[tokio::test]
async fn test_reconcile_against_independent_writer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runs = Arc::new(RunStore::new(dir.path().join("runs")));
    let ledger = RetryLedger::load(dir.path().join("failed_urls.json"), 3, 7)
        .await
        .expect("load");

    ledger
        .record_failure("https://www.x.com/done/", FailureReason::UpstreamTimeout, "Timeout")
        .await
        .expect("record");
    ledger
        .record_failure("https://x.com/pending", FailureReason::UpstreamTimeout, "Timeout")
        .await
        .expect("record");

    // A writer that never told the ledger marks the first URL done
    let mut records = RunRecords::new("2025-08-01");
    let seq = records.append("http://x.com/done");
    records.mark(seq, WorkStatus::Success, None);
    runs.save(&records).await.expect("save");

    let report = ledger.reconcile(&runs).await.expect("reconcile");
    assert_eq!(report.promoted, 1);
    assert_eq!(report.pending_before, 2);
    assert_eq!(report.pending_after, 1);

    // Idempotent: nothing new to promote
    let again = ledger.reconcile(&runs).await.expect("reconcile");
    assert_eq!(again.promoted, 0);
    assert_eq!(again.pending_after, 1);

    assert_eq!(
        ledger.export_pending_work().await,
        vec!["https://x.com/pending".to_string()]
    );
}

#[tokio::test]
async fn test_sweep_reports_categories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = RetryLedger::load(dir.path().join("failed_urls.json"), 2, 7)
        .await
        .expect("load");

    // Budget is 2: two timeouts exhaust it at record time
    for _ in 0..2 {
        ledger
            .record_failure("https://x.com/exhausted", FailureReason::UpstreamTimeout, "Timeout")
            .await
            .expect("record");
    }
    ledger
        .record_failure("https://x.com/fresh", FailureReason::UpstreamTimeout, "Timeout")
        .await
        .expect("record");

    let report = ledger.sweep().await.expect("sweep");
    assert_eq!(report.total, 1); // only the fresh entry was still pending
    assert_eq!(report.retryable, 1);
    assert_eq!(report.permanent, 0);

    let counts = ledger.status_counts().await;
    assert_eq!(counts.get("permanent_failed"), Some(&1));
    assert_eq!(counts.get("pending_retry"), Some(&1));
}

#[tokio::test]
async fn test_success_report_clears_pending() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = RetryLedger::load(dir.path().join("failed_urls.json"), 3, 7)
        .await
        .expect("load");

    ledger
        .record_failure("https://x.com/retry-me", FailureReason::Unknown, "net::ERR_RESET")
        .await
        .expect("record");
    ledger
        .record_success("https://www.x.com/retry-me/")
        .await
        .expect("success");

    assert!(ledger.export_pending_work().await.is_empty());
    let all = ledger.snapshot().await;
    assert_eq!(all[0].status, LedgerStatus::Succeeded);
}

//! Doctor audit scenarios: coverage detection, sharded backfill, and the
//! at-most-once-per-fingerprint guarantee across overlapping audits.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::FutureExt;

use leeksaver::config::Settings;
use leeksaver::doctor::DataDoctor;
use leeksaver::sched::runtime::{Job, JobRuntime};
use leeksaver::sync::{SyncContext, SyncStats};

use common::{daily_frame, seeded_store, MockFeed};

fn many_codes(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{:06}", 100_000 + i)).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_flags_missing_coverage_and_enqueues_sharded_backfills() {
    // 120 active symbols, zero bars: coverage 0% → two shards of ≤100.
    let codes = many_codes(120);
    let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let store = seeded_store(&code_refs).await;

    let feed = Arc::new(MockFeed::new());
    for code in &codes {
        feed.set_daily(code, daily_frame(&["2024-01-15"], 10.0));
    }

    let (runtime, _workers) = JobRuntime::start(store.clone(), 1);

    // Pin the single worker so backfill jobs stay in flight for the second
    // audit.
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let blocker_gate = gate.clone();
    let blocker = Job::new("blocker", move |_| {
        async move {
            let _permit = blocker_gate.acquire().await.unwrap();
            Ok(SyncStats::default())
        }
        .boxed()
    });
    runtime.submit(blocker).await.unwrap();

    let ctx = Arc::new(SyncContext {
        feed: feed.clone(),
        store: store.clone(),
        settings: Settings::default(),
        embedder: None,
        jobs: Some(runtime.clone()),
    });
    let doctor = DataDoctor::new(ctx);
    let monday = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

    let report = doctor.run(monday).await.unwrap();
    assert!(!report.passed);
    let quotes = &report.datasets[0];
    assert_eq!(quotes.dataset, "daily_quotes");
    assert_eq!(quotes.coverage, 0.0);
    assert_eq!(quotes.missing_symbols, 120);
    assert_eq!(quotes.backfills_enqueued, 2);

    // A second audit while those backfills are still pending submits
    // nothing new: same fingerprints, same in-flight dedup keys. Both quote
    // shards and the valuations rerun are skipped.
    let report = doctor.run(monday).await.unwrap();
    assert_eq!(report.datasets[0].backfills_enqueued, 0);
    assert_eq!(report.datasets[1].backfills_enqueued, 0);
    assert_eq!(runtime.metrics.jobs_dedup_skipped.load(Ordering::Relaxed), 3);

    // Release the worker and let the backfills drain.
    gate.add_permits(1);
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        if store.daily_bar_count().await.unwrap() == 120 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "backfills did not drain"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    // Coverage restored; the next audit passes and enqueues nothing.
    let report = doctor.run(monday).await.unwrap();
    assert!(report.datasets[0].coverage >= 0.95);
    assert_eq!(report.datasets[0].backfills_enqueued, 0);

    // Every audit was persisted for the operator.
    let (latest, _) = store.latest_doctor_report().await.unwrap().unwrap();
    assert!(latest.contains("daily_quotes"));
}

#[tokio::test]
async fn quarantined_codes_are_excluded_from_backfill() {
    let codes = many_codes(10);
    let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let store = seeded_store(&code_refs).await;

    // One code has exhausted its retry budget.
    let err = leeksaver::error::SyncError::UpstreamUnavailable("503".into());
    for _ in 0..=leeksaver::config::QUARANTINE_RETRIES {
        store
            .record_sync_error("daily_quotes", Some(&codes[0]), &err)
            .await
            .unwrap();
    }

    let (runtime, _workers) = JobRuntime::start(store.clone(), 1);
    let ctx = Arc::new(SyncContext {
        feed: Arc::new(MockFeed::new()),
        store: store.clone(),
        settings: Settings::default(),
        embedder: None,
        jobs: Some(runtime),
    });
    let doctor = DataDoctor::new(ctx);

    let report = doctor
        .run(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        .await
        .unwrap();
    let quotes = &report.datasets[0];
    assert_eq!(quotes.quarantined_excluded, 1);
    // 10 active, 1 quarantined → 9 in the backfill set.
    assert_eq!(quotes.missing_symbols, 9);
}

#[tokio::test]
async fn weekend_audit_does_not_fail_freshness() {
    let store = seeded_store(&["000001"]).await;
    store
        .upsert_daily_bars(&[leeksaver::store::bars::DailyBar {
            code: "000001".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            volume: 1_000,
            amount: 10_200.0,
            change: None,
            change_pct: Some(1.0),
            turnover_rate: None,
        }])
        .await
        .unwrap();

    let ctx = Arc::new(SyncContext {
        feed: Arc::new(MockFeed::new()),
        store: store.clone(),
        settings: Settings::default(),
        embedder: None,
        jobs: None,
    });
    let doctor = DataDoctor::new(ctx);

    // Saturday: freshness is not checked, coverage is satisfied.
    let saturday = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();
    let report = doctor.run(saturday).await.unwrap();
    assert!(!report.trading_day);
    assert!(report.datasets[0].freshness_ok);
}

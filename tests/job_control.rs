//! Runtime-level scenarios: deadline-driven cancellation of a large sync,
//! with idempotent partial writes surviving intact.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use leeksaver::config::Settings;
use leeksaver::sched::runtime::{Job, JobOutcome, JobRuntime};
use leeksaver::sync::{dispatch, Scope, SyncContext};

use common::{daily_frame, file_store, seed_symbols, MockFeed};

#[tokio::test(flavor = "multi_thread", start_paused = true)]
async fn deadline_cancels_between_shards_keeping_written_data() {
    // 1 000 symbols, 50 ms of upstream latency each: the first 50-symbol
    // shard takes 2.5 s of virtual time, overrunning the 2 s deadline. The
    // cancel signal is only observed at the next shard boundary.
    let codes: Vec<String> = (0..1_000).map(|i| format!("{:06}", 600_000 + i)).collect();
    let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let (_dir, store) = file_store();
    seed_symbols(&store, &code_refs).await;

    let feed = Arc::new(MockFeed::with_latency(Duration::from_millis(50)));
    for code in &codes {
        feed.set_daily(code, daily_frame(&["2024-01-15", "2024-01-16"], 10.0));
    }

    let (runtime, _workers) = JobRuntime::start(store.clone(), 1);
    let ctx = Arc::new(SyncContext {
        feed,
        store: store.clone(),
        settings: Settings::default(),
        embedder: None,
        jobs: None,
    });

    let (done_tx, done_rx) = oneshot::channel();
    let job_ctx = ctx.clone();
    let job = Job::new("daily_quotes", move |cancel| {
        dispatch("daily_quotes", job_ctx, Scope::Codes(codes), cancel)
    })
    .with_dedup_key("daily_quotes")
    .with_deadline(Duration::from_secs(2))
    .with_done(done_tx);
    runtime.submit(job).await.unwrap();

    let outcome = done_rx.await.unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);

    // Exactly the first shard landed, two bars per symbol.
    assert_eq!(store.daily_bar_count().await.unwrap(), 50 * 2);
    let status = store.task_status("daily_quotes").await.unwrap().unwrap();
    assert_eq!(status.last_outcome.as_deref(), Some("cancelled"));

    // Re-running the same scope is safe: idempotent upserts rewrite shard 1
    // and extend the rest. A generous deadline lets it finish.
    let remaining: Vec<String> = (0..100).map(|i| format!("{:06}", 600_000 + i)).collect();
    let (done_tx, done_rx) = oneshot::channel();
    let job = Job::new("daily_quotes", move |cancel| {
        dispatch("daily_quotes", ctx.clone(), Scope::Codes(remaining), cancel)
    })
    .with_dedup_key("daily_quotes")
    .with_deadline(Duration::from_secs(3_600))
    .with_done(done_tx);
    runtime.submit(job).await.unwrap();
    assert_eq!(done_rx.await.unwrap(), JobOutcome::Succeeded);
    assert_eq!(store.daily_bar_count().await.unwrap(), 100 * 2);
}

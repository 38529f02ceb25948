//! Job runtime: a fixed worker pool consuming a job channel.
//!
//! Jobs are the unit of execution for scheduled syncs, ad-hoc CLI triggers,
//! and doctor backfills. Guarantees:
//!
//! - at most one in-flight run per `dedup_key` (duplicate submissions are
//!   counted no-ops),
//! - deadline expiry cancels cooperatively via the job's token; syncers
//!   observe it between shards,
//! - a failing job never takes a worker down: the runtime logs, records a
//!   sync error, releases the dedup key, moves on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};
use crate::store::Store;
use crate::sync::SyncStats;

pub type JobWork =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, SyncResult<SyncStats>> + Send>;

pub struct Job {
    pub id: uuid::Uuid,
    pub name: String,
    pub dedup_key: Option<String>,
    pub deadline: Option<Duration>,
    pub work: JobWork,
    /// Optional completion channel for synchronous callers (CLI trigger).
    pub done: Option<oneshot::Sender<JobOutcome>>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        work: impl FnOnce(CancellationToken) -> BoxFuture<'static, SyncResult<SyncStats>>
            + Send
            + 'static,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            dedup_key: None,
            deadline: None,
            work: Box::new(work),
            done: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_done(mut self, tx: oneshot::Sender<JobOutcome>) -> Self {
        self.done = Some(tx);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Enqueued,
    /// A job with the same dedup key is already in flight; this one was
    /// dropped.
    Deduplicated,
}

#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub jobs_run: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_cancelled: AtomicU64,
    pub jobs_dedup_skipped: AtomicU64,
}

pub struct JobRuntime {
    tx: mpsc::Sender<Job>,
    inflight: Arc<DashMap<String, ()>>,
    pub metrics: Arc<RuntimeMetrics>,
}

impl JobRuntime {
    /// Spawn `workers` consumers over a shared channel and hand back the
    /// submission handle plus the worker join handles.
    pub fn start(store: Arc<Store>, workers: usize) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<Job>(256);
        let rx = Arc::new(Mutex::new(rx));
        let inflight: Arc<DashMap<String, ()>> = Arc::new(DashMap::new());
        let metrics = Arc::new(RuntimeMetrics::default());

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let store = store.clone();
                let inflight = inflight.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        let Some(job) = job else { break };
                        run_job(&store, &inflight, &metrics, job).await;
                    }
                    tracing::debug!(worker_id, "job worker draining, channel closed");
                })
            })
            .collect();

        (
            Arc::new(Self {
                tx,
                inflight,
                metrics,
            }),
            handles,
        )
    }

    /// Enqueue a job. Duplicate dedup keys are a no-op by contract.
    pub async fn submit(&self, job: Job) -> SyncResult<Submission> {
        if let Some(key) = &job.dedup_key {
            if self.inflight.insert(key.clone(), ()).is_some() {
                self.metrics
                    .jobs_dedup_skipped
                    .fetch_add(1, Ordering::Relaxed);
                tracing::info!(job = %job.name, key = %key, "dedup key in flight, dropping submission");
                return Ok(Submission::Deduplicated);
            }
        }
        if let Err(e) = self.tx.send(job).await {
            // Release the key the failed submission reserved.
            if let Some(key) = &e.0.dedup_key {
                self.inflight.remove(key);
            }
            return Err(SyncError::Unknown(format!("job channel closed: {e}")));
        }
        Ok(Submission::Enqueued)
    }
}

async fn run_job(
    store: &Store,
    inflight: &DashMap<String, ()>,
    metrics: &RuntimeMetrics,
    job: Job,
) {
    metrics.jobs_run.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(job = %job.name, id = %job.id, "job picked up");
    if let Err(e) = store.record_task_start(&job.name).await {
        tracing::warn!(job = %job.name, "failed to record task start: {e}");
    }

    let token = CancellationToken::new();
    let fut = (job.work)(token.clone());
    let result = match job.deadline {
        Some(deadline) => {
            tokio::pin!(fut);
            tokio::select! {
                r = &mut fut => r,
                () = tokio::time::sleep(deadline) => {
                    tracing::warn!(job = %job.name, ?deadline, "deadline expired, cancelling");
                    token.cancel();
                    // Cooperative: the syncer returns Cancelled at the next
                    // shard boundary.
                    fut.await
                }
            }
        }
        None => fut.await,
    };

    let outcome = match result {
        Ok(stats) if stats.errors == 0 => {
            metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                job = %job.name,
                fetched = stats.fetched,
                accepted = stats.accepted,
                written = stats.written,
                "job succeeded"
            );
            let _ = store.record_task_finish(&job.name, "succeeded", None).await;
            // A success closes any open job-level error row for this task.
            let _ = store.resolve_sync_error(&job.name, None).await;
            JobOutcome::Succeeded
        }
        Ok(stats) => {
            // Per-target error rows were recorded inside the syncer; the job
            // itself finishes failed so the partial run stays visible.
            metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
            let msg = format!("{} targets failed", stats.errors);
            tracing::warn!(job = %job.name, written = stats.written, "{msg}");
            let _ = store
                .record_task_finish(&job.name, "failed", Some(&msg))
                .await;
            JobOutcome::Failed(msg)
        }
        Err(SyncError::Cancelled) => {
            metrics.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(job = %job.name, "job cancelled");
            let _ = store
                .record_task_finish(&job.name, "cancelled", None)
                .await;
            JobOutcome::Cancelled
        }
        Err(e) => {
            metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job = %job.name, "job failed: {e}");
            let _ = store.record_sync_error(&job.name, None, &e).await;
            let _ = store
                .record_task_finish(&job.name, "failed", Some(&e.to_string()))
                .await;
            JobOutcome::Failed(e.to_string())
        }
    };

    if let Some(key) = &job.dedup_key {
        inflight.remove(key);
    }
    if let Some(done) = job.done {
        let _ = done.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn ok_stats() -> SyncStats {
        SyncStats {
            fetched: 1,
            accepted: 1,
            written: 1,
            errors: 0,
        }
    }

    async fn await_done(rx: oneshot::Receiver<JobOutcome>) -> JobOutcome {
        rx.await.expect("job dropped its completion channel")
    }

    #[tokio::test]
    async fn dedup_key_runs_exactly_once() {
        // Two submissions with the same key → one run, one counted skip.
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runtime, _handles) = JobRuntime::start(store, 2);

        let counter = Arc::new(AtomicU64::new(0));
        let (tx_a, rx_a) = oneshot::channel();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        let c = counter.clone();
        let g = gate.clone();
        let slow = Job::new("backfill", move |_| {
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                // Hold the dedup key until the duplicate was submitted.
                let _permit = g.acquire().await.unwrap();
                Ok(ok_stats())
            }
            .boxed()
        })
        .with_dedup_key("backfill:daily_quotes:h1")
        .with_done(tx_a);
        assert_eq!(runtime.submit(slow).await.unwrap(), Submission::Enqueued);

        // Give the worker a moment to pick it up, then submit the duplicate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let c = counter.clone();
        let dup = Job::new("backfill", move |_| {
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(ok_stats())
            }
            .boxed()
        })
        .with_dedup_key("backfill:daily_quotes:h1");
        assert_eq!(
            runtime.submit(dup).await.unwrap(),
            Submission::Deduplicated
        );

        gate.add_permits(1);
        assert_eq!(await_done(rx_a).await, JobOutcome::Succeeded);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            runtime.metrics.jobs_dedup_skipped.load(Ordering::Relaxed),
            1
        );

        // Key released after completion — a later submission runs again.
        let (tx_b, rx_b) = oneshot::channel();
        let c = counter.clone();
        let again = Job::new("backfill", move |_| {
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(ok_stats())
            }
            .boxed()
        })
        .with_dedup_key("backfill:daily_quotes:h1")
        .with_done(tx_b);
        assert_eq!(runtime.submit(again).await.unwrap(), Submission::Enqueued);
        assert_eq!(await_done(rx_b).await, JobOutcome::Succeeded);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_cooperatively() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runtime, _handles) = JobRuntime::start(store.clone(), 1);

        let (tx, rx) = oneshot::channel();
        let job = Job::new("slow_sync", move |cancel: CancellationToken| {
            async move {
                // Simulates shard iteration: work, then observe the token.
                for _ in 0..100 {
                    if cancel.is_cancelled() {
                        return Err(SyncError::Cancelled);
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(ok_stats())
            }
            .boxed()
        })
        .with_deadline(Duration::from_secs(2))
        .with_done(tx);

        runtime.submit(job).await.unwrap();
        assert_eq!(await_done(rx).await, JobOutcome::Cancelled);
        assert_eq!(runtime.metrics.jobs_cancelled.load(Ordering::Relaxed), 1);

        let status = store.task_status("slow_sync").await.unwrap().unwrap();
        assert_eq!(status.last_outcome.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn failed_job_records_error_and_releases_worker() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (runtime, _handles) = JobRuntime::start(store.clone(), 1);

        let (tx, rx) = oneshot::channel();
        let job = Job::new("news", move |_| {
            async move { Err(SyncError::SchemaDrift("list gone".into())) }.boxed()
        })
        .with_done(tx);
        runtime.submit(job).await.unwrap();
        assert!(matches!(await_done(rx).await, JobOutcome::Failed(_)));

        // The worker survives and keeps serving.
        let (tx, rx) = oneshot::channel();
        let job = Job::new("news", move |_| async move { Ok(ok_stats()) }.boxed()).with_done(tx);
        runtime.submit(job).await.unwrap();
        assert_eq!(await_done(rx).await, JobOutcome::Succeeded);

        // Failure recorded, then resolved by the following success.
        let rows = store.sync_errors_for_task("news").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].resolved_at.is_some());
    }
}

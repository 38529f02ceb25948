//! Trigger loop: turns the generated schedule into timed job submissions.
//!
//! One driver task per scheduled entry. Cron-style triggers compute their
//! next wall-clock firing and sleep to it; interval triggers ride a plain
//! timer after their stagger delay. Every submission goes through the
//! runtime with the task name as dedup key, so a slow run can never overlap
//! itself.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::generate::{next_fire, ScheduledTask, Trigger};
use super::runtime::{Job, JobRuntime};
use crate::store::Store;
use crate::sync::{dispatch, Scope, SyncContext};

/// Upper bound for one run of a cron-tier task.
const CRON_JOB_DEADLINE: Duration = Duration::from_secs(30 * 60);

pub struct Scheduler {
    schedule: Vec<ScheduledTask>,
    runtime: Arc<JobRuntime>,
    ctx: Arc<SyncContext>,
    store: Arc<Store>,
}

impl Scheduler {
    pub fn new(
        schedule: Vec<ScheduledTask>,
        runtime: Arc<JobRuntime>,
        ctx: Arc<SyncContext>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            schedule,
            runtime,
            ctx,
            store,
        }
    }

    /// Drive all triggers until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut drivers = Vec::with_capacity(self.schedule.len());
        for task in self.schedule {
            drivers.push(tokio::spawn(drive_task(
                task,
                self.runtime.clone(),
                self.ctx.clone(),
                self.store.clone(),
                shutdown.clone(),
            )));
        }
        for driver in drivers {
            let _ = driver.await;
        }
    }
}

async fn drive_task(
    task: ScheduledTask,
    runtime: Arc<JobRuntime>,
    ctx: Arc<SyncContext>,
    store: Arc<Store>,
    shutdown: CancellationToken,
) {
    match task.trigger {
        Trigger::Every {
            period,
            initial_delay,
        } => {
            tokio::select! {
                () = tokio::time::sleep(initial_delay) => {}
                () = shutdown.cancelled() => return,
            }
            loop {
                submit(&runtime, &ctx, task.name, period).await;
                tokio::select! {
                    () = tokio::time::sleep(period) => {}
                    () = shutdown.cancelled() => return,
                }
            }
        }
        trigger @ (Trigger::DailyAt(_) | Trigger::WeeklyAt(_, _)) => loop {
            let now = chrono::Local::now().naive_local();
            let Some(next) = next_fire(&trigger, now) else {
                tracing::error!(task = task.name, "trigger produced no next firing");
                return;
            };
            let _ = store
                .record_next_run(task.name, &next.format("%Y-%m-%d %H:%M:%S").to_string())
                .await;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = shutdown.cancelled() => return,
            }
            submit(&runtime, &ctx, task.name, CRON_JOB_DEADLINE).await;
        },
    }
}

async fn submit(
    runtime: &Arc<JobRuntime>,
    ctx: &Arc<SyncContext>,
    name: &'static str,
    deadline: Duration,
) {
    let ctx = ctx.clone();
    let job = Job::new(name, move |cancel| dispatch(name, ctx, Scope::Auto, cancel))
        .with_dedup_key(name)
        .with_deadline(deadline);
    match runtime.submit(job).await {
        Ok(submission) => {
            tracing::debug!(task = name, ?submission, "scheduled submission");
        }
        Err(e) => tracing::error!(task = name, "failed to submit scheduled job: {e}"),
    }
}

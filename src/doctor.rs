//! Data Doctor: daily coverage/freshness/quality audit with automatic,
//! dedup-keyed backfill.
//!
//! The audit reads the store only; action happens by submitting backfill
//! jobs to the runtime. Shard dedup keys guarantee the same backfill never
//! runs twice concurrently, even when audits overlap.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::config::COVERAGE_TARGET;
use crate::error::SyncResult;
use crate::sched::runtime::{Job, Submission};
use crate::sync::{
    dispatch, partition_codes, shard_fingerprint, Scope, SyncContext, SyncStats, Syncer,
};

/// Coverage window: a symbol counts as covered when it has at least one row
/// this many days back.
const COVERAGE_WINDOW_DAYS: i64 = 7;
/// Quality window for invariant scanning.
const QUALITY_WINDOW_DAYS: i64 = 3;
/// Backfill shards never exceed this many symbols.
const BACKFILL_SHARD_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetAudit {
    pub dataset: String,
    pub coverage: f64,
    pub coverage_target: f64,
    pub freshness_ok: bool,
    pub quality_violations: usize,
    pub missing_symbols: usize,
    pub quarantined_excluded: usize,
    pub backfills_enqueued: usize,
}

impl DatasetAudit {
    pub fn healthy(&self) -> bool {
        self.coverage >= self.coverage_target
            && self.freshness_ok
            && self.quality_violations == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    pub generated_at: String,
    pub trading_day: bool,
    pub datasets: Vec<DatasetAudit>,
    pub passed: bool,
}

/// Weekday approximation of the trading calendar: lenient on exchange
/// holidays, never false-alarming on weekends.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub struct DataDoctor {
    ctx: Arc<SyncContext>,
}

impl DataDoctor {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Run the full audit, persist the report, and enqueue backfill work
    /// when a runtime is attached to the context.
    pub async fn run(&self, today: NaiveDate) -> SyncResult<DoctorReport> {
        let store = &self.ctx.store;
        let active: Vec<String> = store.active_codes().await?;
        let active_set: HashSet<&String> = active.iter().collect();
        let total = active.len();
        let coverage_since = today - chrono::Duration::days(COVERAGE_WINDOW_DAYS);
        let trading_day = is_trading_day(today);

        let mut datasets = Vec::new();

        // -- daily_quotes ----------------------------------------------------
        let covered: HashSet<String> = store
            .codes_with_bars_since(coverage_since)
            .await?
            .into_iter()
            .collect();
        let quarantined = store.quarantined_codes("daily_quotes").await?;
        let missing: Vec<String> = active
            .iter()
            .filter(|c| !covered.contains(*c) && !quarantined.contains(*c))
            .cloned()
            .collect();
        let coverage = if total == 0 {
            1.0
        } else {
            covered.iter().filter(|c| active_set.contains(c)).count() as f64 / total as f64
        };
        let freshness_ok = !trading_day
            || store.latest_trade_date().await?.is_some_and(|d| d >= today);
        let quality_violations = store
            .invalid_bar_count(today - chrono::Duration::days(QUALITY_WINDOW_DAYS))
            .await?;

        let needs_backfill = coverage < COVERAGE_TARGET || !freshness_ok;
        let backfills_enqueued = if needs_backfill && !missing.is_empty() {
            self.enqueue_backfills("daily_quotes", missing.clone()).await?
        } else {
            0
        };

        datasets.push(DatasetAudit {
            dataset: "daily_quotes".to_string(),
            coverage,
            coverage_target: COVERAGE_TARGET,
            freshness_ok,
            quality_violations,
            missing_symbols: missing.len(),
            quarantined_excluded: quarantined.len(),
            backfills_enqueued,
        });

        // -- valuations ------------------------------------------------------
        let covered: HashSet<String> = store
            .codes_with_valuations_since(coverage_since)
            .await?
            .into_iter()
            .collect();
        let coverage = if total == 0 {
            1.0
        } else {
            covered.iter().filter(|c| active_set.contains(c)).count() as f64 / total as f64
        };
        let missing_count = total.saturating_sub(covered.len());
        // Valuations come as one market-wide snapshot; the remedy is a full
        // re-run rather than per-symbol shards.
        let backfills_enqueued = if coverage < COVERAGE_TARGET && trading_day {
            self.enqueue_full_rerun("valuations").await?
        } else {
            0
        };
        datasets.push(DatasetAudit {
            dataset: "valuations".to_string(),
            coverage,
            coverage_target: COVERAGE_TARGET,
            freshness_ok: true,
            quality_violations: 0,
            missing_symbols: missing_count,
            quarantined_excluded: 0,
            backfills_enqueued,
        });

        let passed = datasets.iter().all(DatasetAudit::healthy);
        let report = DoctorReport {
            generated_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            trading_day,
            datasets,
            passed,
        };

        let json = serde_json::to_string(&report)
            .map_err(|e| crate::error::SyncError::Unknown(e.to_string()))?;
        store.insert_doctor_report(&json, passed).await?;
        tracing::info!(passed, "doctor audit persisted");
        Ok(report)
    }

    /// Shard the missing set and submit one dedup-keyed backfill job per
    /// shard. Returns how many jobs were actually enqueued (duplicates of
    /// still-running backfills are no-ops).
    async fn enqueue_backfills(
        &self,
        dataset: &'static str,
        missing: Vec<String>,
    ) -> SyncResult<usize> {
        let Some(runtime) = &self.ctx.jobs else {
            tracing::info!(
                dataset,
                missing = missing.len(),
                "no runtime attached, backfill left to the operator"
            );
            return Ok(0);
        };

        let mut enqueued = 0;
        for shard in partition_codes(missing, BACKFILL_SHARD_SIZE) {
            let key = format!("backfill:{dataset}:{}", shard_fingerprint(&shard));
            let child_ctx = Arc::new(SyncContext {
                feed: self.ctx.feed.clone(),
                store: self.ctx.store.clone(),
                settings: self.ctx.settings.clone(),
                embedder: self.ctx.embedder.clone(),
                jobs: None,
            });
            let job = Job::new(dataset, move |cancel| {
                dispatch(dataset, child_ctx, Scope::Codes(shard), cancel)
            })
            .with_dedup_key(key)
            .with_deadline(std::time::Duration::from_secs(30 * 60));

            if runtime.submit(job).await? == Submission::Enqueued {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    async fn enqueue_full_rerun(&self, task: &'static str) -> SyncResult<usize> {
        let Some(runtime) = &self.ctx.jobs else {
            return Ok(0);
        };
        let child_ctx = Arc::new(SyncContext {
            feed: self.ctx.feed.clone(),
            store: self.ctx.store.clone(),
            settings: self.ctx.settings.clone(),
            embedder: self.ctx.embedder.clone(),
            jobs: None,
        });
        let job = Job::new(task, move |cancel| {
            dispatch(task, child_ctx, Scope::Auto, cancel)
        })
        .with_dedup_key(format!("backfill:{task}:full"))
        .with_deadline(std::time::Duration::from_secs(30 * 60));
        Ok(usize::from(runtime.submit(job).await? == Submission::Enqueued))
    }
}

/// Registry adapter so the doctor runs as an ordinary scheduled task.
pub struct DoctorSyncer;

#[async_trait]
impl Syncer for DoctorSyncer {
    fn name(&self) -> &'static str {
        "data_doctor"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let today = match scope {
            Scope::Date(d) => d,
            _ => chrono::Local::now().date_naive(),
        };
        let report = DataDoctor::new(ctx).run(today).await?;
        Ok(SyncStats {
            fetched: report.datasets.len(),
            accepted: report.datasets.iter().filter(|d| d.healthy()).count(),
            written: report
                .datasets
                .iter()
                .map(|d| d.backfills_enqueued)
                .sum(),
            errors: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_trading_calendar() {
        // 2024-01-15 is a Monday, 2024-01-13 a Saturday.
        assert!(is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()));
        assert!(!is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 13).unwrap()));
        assert!(!is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()));
    }

    #[test]
    fn audit_health_requires_all_three_checks() {
        let mut audit = DatasetAudit {
            dataset: "daily_quotes".to_string(),
            coverage: 0.99,
            coverage_target: COVERAGE_TARGET,
            freshness_ok: true,
            quality_violations: 0,
            missing_symbols: 0,
            quarantined_excluded: 0,
            backfills_enqueued: 0,
        };
        assert!(audit.healthy());
        audit.coverage = 0.90;
        assert!(!audit.healthy());
        audit.coverage = 0.99;
        audit.freshness_ok = false;
        assert!(!audit.healthy());
        audit.freshness_ok = true;
        audit.quality_violations = 2;
        assert!(!audit.healthy());
    }
}

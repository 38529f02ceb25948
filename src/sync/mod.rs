//! Syncers: one per dataset, each a three-phase pipeline of scope
//! resolution, gated per-target fetch, and transform + upsert.
//!
//! The common machinery lives here: the [`Syncer`] trait, the shared
//! [`SyncContext`], scope sharding with cooperative cancellation between
//! shards, and the per-target error bookkeeping that guarantees nothing is
//! ever swallowed — every failed target leaves a `sync_errors` row, every
//! later success closes it.

pub mod financials;
pub mod indicators;
pub mod market;
pub mod news;
pub mod quotes;
pub mod symbols;

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use futures::FutureExt;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::config::{Settings, SHARD_THRESHOLD};
use crate::error::{SyncError, SyncResult};
use crate::feed::embedding::Embedder;
use crate::feed::MarketFeed;
use crate::sched::runtime::{Job, JobRuntime};
use crate::store::Store;

/// What a syncer run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Let the syncer resolve its own targets (all symbols, watchlist, …).
    Auto,
    /// An explicit code list — doctor backfills and `--code` triggers.
    Codes(Vec<String>),
    /// A single trade date — `--date` triggers and replays.
    Date(NaiveDate),
}

/// Progress counters reported per run and per shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub fetched: usize,
    pub accepted: usize,
    pub written: usize,
    pub errors: usize,
}

impl std::ops::AddAssign for SyncStats {
    fn add_assign(&mut self, rhs: Self) {
        self.fetched += rhs.fetched;
        self.accepted += rhs.accepted;
        self.written += rhs.written;
        self.errors += rhs.errors;
    }
}

/// Everything a syncer needs, built once in the composition root and passed
/// down explicitly.
pub struct SyncContext {
    pub feed: Arc<dyn MarketFeed>,
    pub store: Arc<Store>,
    pub settings: Settings,
    pub embedder: Option<Arc<dyn Embedder>>,
    /// Present when running under the scheduler; lets large scopes fan out
    /// into child jobs. Ad-hoc and child runs leave it empty.
    pub jobs: Option<Arc<JobRuntime>>,
}

#[async_trait]
pub trait Syncer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats>;
}

/// Look up a syncer by registry name.
pub fn syncer_by_name(name: &str) -> Option<Box<dyn Syncer>> {
    match name {
        "symbol_list" => Some(Box::new(symbols::SymbolListSyncer)),
        "daily_quotes" => Some(Box::new(quotes::DailyQuotesSyncer)),
        "minute_bars" => Some(Box::new(quotes::MinuteBarsSyncer)),
        "tech_indicators" => Some(Box::new(indicators::TechIndicatorsSyncer)),
        "financial_statements" => Some(Box::new(financials::FinancialsSyncer)),
        "valuations" => Some(Box::new(market::ValuationsSyncer)),
        "fund_flow" => Some(Box::new(market::FundFlowSyncer)),
        "margin" => Some(Box::new(market::MarginSyncer)),
        "dragon_tiger" => Some(Box::new(market::DragonTigerSyncer)),
        "northbound_flow" => Some(Box::new(market::NorthboundSyncer)),
        "market_sentiment" => Some(Box::new(market::SentimentSyncer)),
        "limit_up" => Some(Box::new(market::LimitUpSyncer)),
        "sector_quotes" => Some(Box::new(market::SectorQuotesSyncer)),
        "news" => Some(Box::new(news::NewsSyncer)),
        "news_cleanup" => Some(Box::new(news::NewsCleanupSyncer)),
        "embeddings" => Some(Box::new(news::EmbeddingsSyncer)),
        "data_doctor" => Some(Box::new(crate::doctor::DoctorSyncer)),
        _ => None,
    }
}

/// Boxed entry point used by the scheduler and the runtime's child jobs.
pub fn dispatch(
    name: &str,
    ctx: Arc<SyncContext>,
    scope: Scope,
    cancel: CancellationToken,
) -> BoxFuture<'static, SyncResult<SyncStats>> {
    let syncer = syncer_by_name(name);
    let name = name.to_string();
    async move {
        let Some(syncer) = syncer else {
            return Err(SyncError::Unknown(format!("unknown syncer {name}")));
        };
        syncer.run(ctx, scope, &cancel).await
    }
    .boxed()
}

/// Split a code list into shard-sized slices.
pub fn partition_codes(codes: Vec<String>, shard_size: usize) -> Vec<Vec<String>> {
    let shard_size = shard_size.max(1);
    codes
        .chunks(shard_size)
        .map(<[String]>::to_vec)
        .collect()
}

/// Stable fingerprint of a shard's code set, independent of input order.
pub fn shard_fingerprint(codes: &[String]) -> String {
    let mut sorted: Vec<&String> = codes.iter().collect();
    sorted.sort();
    let mut hasher = FxHasher::default();
    for code in sorted {
        code.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> SyncResult<()> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

/// Outcome of one target inside a shard.
pub(crate) struct TargetOutcome {
    pub fetched: usize,
    pub accepted: usize,
    pub written: usize,
}

/// Drive a per-code syncer over its scope.
///
/// Shards of `sync_batch_size` are walked sequentially; the cancel token is
/// observed between shards, never mid-shard. A failing target records its
/// `sync_errors` row and the shard moves on — the error surfaces in the
/// run's `errors` count instead of vanishing. A succeeding target closes
/// any open row for its key.
///
/// When the scope is larger than the shard threshold and a job runtime is
/// attached, the run fans out instead: each shard is enqueued as a child
/// job (dedup-keyed by shard fingerprint) and this call returns after
/// submission.
pub(crate) async fn run_sharded<F, Fut>(
    ctx: &Arc<SyncContext>,
    cancel: &CancellationToken,
    task: &'static str,
    codes: Vec<String>,
    per_code: F,
) -> SyncResult<SyncStats>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = SyncResult<TargetOutcome>>,
{
    let shard_size = ctx.settings.sync_batch_size;

    if codes.len() > SHARD_THRESHOLD {
        if let Some(runtime) = &ctx.jobs {
            let shards = partition_codes(codes, shard_size);
            let total = shards.len();
            for shard in shards {
                let key = format!("{task}:shard:{}", shard_fingerprint(&shard));
                let child_ctx = Arc::new(SyncContext {
                    feed: ctx.feed.clone(),
                    store: ctx.store.clone(),
                    settings: ctx.settings.clone(),
                    embedder: ctx.embedder.clone(),
                    jobs: None,
                });
                let job = Job::new(task, move |child_cancel| {
                    dispatch(task, child_ctx, Scope::Codes(shard), child_cancel)
                })
                .with_dedup_key(key)
                .with_deadline(std::time::Duration::from_secs(30 * 60));
                runtime.submit(job).await?;
            }
            tracing::info!(task, shards = total, "scope fanned out into child jobs");
            return Ok(SyncStats::default());
        }
    }

    let mut stats = SyncStats::default();
    let total = codes.len().max(1);
    let mut done = 0usize;

    for shard in codes.chunks(shard_size.max(1)) {
        check_cancelled(cancel)?;
        for code in shard {
            match per_code(code.clone()).await {
                Ok(outcome) => {
                    stats.fetched += outcome.fetched;
                    stats.accepted += outcome.accepted;
                    stats.written += outcome.written;
                    ctx.store.resolve_sync_error(task, Some(code)).await?;
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(task, code = %code, "target failed: {e}");
                    ctx.store.record_sync_error(task, Some(code), &e).await?;
                }
            }
        }
        done += shard.len();
        let pct = done as f64 / total as f64 * 100.0;
        let _ = ctx.store.record_task_progress(task, pct).await;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_respects_shard_size() {
        let codes: Vec<String> = (0..105).map(|i| format!("{i:06}")).collect();
        let shards = partition_codes(codes, 50);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].len(), 50);
        assert_eq!(shards[2].len(), 5);
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = vec!["000001".to_string(), "600519".to_string()];
        let b = vec!["600519".to_string(), "000001".to_string()];
        assert_eq!(shard_fingerprint(&a), shard_fingerprint(&b));
        let c = vec!["000002".to_string()];
        assert_ne!(shard_fingerprint(&a), shard_fingerprint(&c));
    }
}

//! News pipeline: time-window ingestion, retention cleanup, and the
//! embedding backfill.

use std::sync::Arc;

use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::feed::embedding::vector_to_blob;
use crate::store::news::NewsArticle;
use crate::transform::{opt_datetime_col, opt_str_col, require_cols};

use super::{check_cancelled, Scope, SyncContext, SyncStats, Syncer};

/// Overlap re-queried on every steady-state pass so an article landing on
/// the window edge can never be dropped.
const WINDOW_OVERLAP_MINUTES: i64 = 5;
/// Cold-start backfill horizon.
const COLD_START_HOURS: i64 = 24;

pub struct NewsSyncer;

#[async_trait]
impl Syncer for NewsSyncer {
    fn name(&self) -> &'static str {
        "news"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        _scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let now = chrono::Local::now().naive_local();
        let since = match ctx.store.last_success_at(self.name()).await? {
            Some(last_success) => {
                last_success - chrono::Duration::minutes(WINDOW_OVERLAP_MINUTES)
            }
            None => now - chrono::Duration::hours(COLD_START_HOURS),
        };

        let frame = match ctx.feed.news_since(since).await {
            Ok(df) => df,
            Err(SyncError::Empty) => return Ok(SyncStats::default()),
            Err(e) => return Err(e),
        };
        let fetched = frame.height();

        let rows = rows_from_frame(&frame)?;
        let accepted = rows.len();
        // Insert-ignore: the overlap window re-fetches known articles and
        // the (id, source+url) uniques drop them here.
        let outcome = ctx.store.insert_news(&rows).await?;
        tracing::info!(
            fetched,
            new = outcome.written,
            since = %since,
            "news window ingested"
        );

        Ok(SyncStats {
            fetched,
            accepted,
            written: outcome.written,
            errors: 0,
        })
    }
}

fn rows_from_frame(df: &DataFrame) -> SyncResult<Vec<NewsArticle>> {
    require_cols(df, &["id", "title", "publish_time", "source"])?;

    let ids = opt_str_col(df, "id")?;
    let titles = opt_str_col(df, "title")?;
    let bodies = opt_str_col(df, "body")?;
    let publish_times = opt_datetime_col(df, "publish_time")?;
    let sources = opt_str_col(df, "source")?;
    let urls = opt_str_col(df, "url")?;
    let related = opt_str_col(df, "related_symbols")?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(id), Some(title), Some(publish_time), Some(source)) = (
            ids[i].clone(),
            titles[i].clone(),
            publish_times[i],
            sources[i].clone(),
        ) else {
            continue;
        };
        rows.push(NewsArticle {
            id: format!("{source}:{id}"),
            title,
            body: bodies[i].clone(),
            publish_time,
            source,
            url: urls[i].clone(),
            related_symbols: related[i].clone().filter(|s| !s.is_empty()),
        });
    }
    Ok(rows)
}

/// Weekly retention purge. Articles still related to watchlist symbols are
/// kept when protection is on.
pub struct NewsCleanupSyncer;

#[async_trait]
impl Syncer for NewsCleanupSyncer {
    fn name(&self) -> &'static str {
        "news_cleanup"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        _scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let cutoff: NaiveDateTime = chrono::Local::now().naive_local()
            - chrono::Duration::days(ctx.settings.news_retention_days);

        let protected = if ctx.settings.protect_watchlist_news {
            Some(ctx.store.watchlist_set().await?)
        } else {
            None
        };
        let deleted = ctx
            .store
            .cleanup_news(cutoff, protected.as_ref())
            .await?;
        tracing::info!(deleted, cutoff = %cutoff, "news retention cleanup");

        Ok(SyncStats {
            fetched: 0,
            accepted: deleted,
            written: deleted,
            errors: 0,
        })
    }
}

/// Vectorizes articles still missing an embedding, in provider-sized
/// batches, until the backlog drains or the job is cancelled.
pub struct EmbeddingsSyncer;

#[async_trait]
impl Syncer for EmbeddingsSyncer {
    fn name(&self) -> &'static str {
        "embeddings"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        _scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let Some(embedder) = ctx.embedder.clone() else {
            tracing::debug!("embedding service not configured, skipping");
            return Ok(SyncStats::default());
        };
        let batch_size = embedder.max_batch().max(1);

        let mut stats = SyncStats::default();
        loop {
            check_cancelled(cancel)?;
            let pending = ctx.store.unembedded_news(batch_size).await?;
            if pending.is_empty() {
                break;
            }
            stats.fetched += pending.len();

            let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            let updates: Vec<(String, Vec<u8>)> = pending
                .iter()
                .zip(vectors.iter())
                .map(|((id, _), v)| (id.clone(), vector_to_blob(v)))
                .collect();
            let written = ctx.store.set_news_embeddings(&updates).await?;
            stats.accepted += updates.len();
            stats.written += written;

            // A batch that updated nothing would spin forever on the same
            // backlog.
            if written == 0 || pending.len() < batch_size {
                break;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn rows_prefix_id_with_source() {
        let df = df! {
            "id" => &["20240115A01"],
            "title" => &["央行开展逆回购操作"],
            "body" => &[Some("公开市场业务公告")],
            "publish_time" => &["2024-01-15 09:15:00"],
            "source" => &["eastmoney"],
            "url" => &[Some("https://example.com/n/1")],
            "related_symbols" => &[Some("600519,000001")],
        }
        .unwrap();
        let rows = rows_from_frame(&df).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "eastmoney:20240115A01");
        assert_eq!(rows[0].related_symbols.as_deref(), Some("600519,000001"));
    }

    #[test]
    fn rows_drop_entries_missing_keys() {
        let df = df! {
            "id" => &[Some("a"), None],
            "title" => &[Some("t"), Some("t2")],
            "body" => &[None::<&str>, None],
            "publish_time" => &[Some("2024-01-15 09:15:00"), Some("2024-01-15 09:16:00")],
            "source" => &[Some("eastmoney"), Some("eastmoney")],
            "url" => &[None::<&str>, None],
            "related_symbols" => &[None::<&str>, None],
        }
        .unwrap();
        let rows = rows_from_frame(&df).unwrap();
        assert_eq!(rows.len(), 1);
    }
}

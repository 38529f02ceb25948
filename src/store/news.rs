//! News article repository: append-only inserts, embedding backfill, and
//! the retention cleanup with watchlist protection.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use rusqlite::params;
use rusqlite::types::Value;

use super::{bulk_write, BulkSpec, Store, WriteOutcome};
use crate::config::CHUNK_ROWS;
use crate::error::SyncResult;

#[derive(Debug, Clone, PartialEq)]
pub struct NewsArticle {
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub publish_time: NaiveDateTime,
    pub source: String,
    pub url: Option<String>,
    /// Comma-joined related security codes.
    pub related_symbols: Option<String>,
}

/// Dedup rides the primary key (source-native id) and the `(source, url)`
/// unique index; replays are silently ignored.
const INSERT_NEWS: BulkSpec = BulkSpec {
    insert_sql: "INSERT OR IGNORE INTO news_articles \
                 (id, title, body, publish_time, source, url, related_symbols)",
    row_params: 7,
    conflict_sql: "",
};

fn ts_text(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Store {
    pub async fn insert_news(&self, rows: &[NewsArticle]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|n| {
                vec![
                    Value::from(n.id.clone()),
                    Value::from(n.title.clone()),
                    Value::from(n.body.clone()),
                    Value::from(ts_text(n.publish_time)),
                    Value::from(n.source.clone()),
                    Value::from(n.url.clone()),
                    Value::from(n.related_symbols.clone()),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &INSERT_NEWS, values, CHUNK_ROWS))
            .await
    }

    /// Oldest-first articles still waiting for a vector.
    pub async fn unembedded_news(&self, limit: usize) -> SyncResult<Vec<(String, String)>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, title || ' ' || COALESCE(body, '') FROM news_articles \
                 WHERE embedding IS NULL ORDER BY publish_time LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn set_news_embeddings(&self, rows: &[(String, Vec<u8>)]) -> SyncResult<usize> {
        let rows = rows.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE news_articles SET embedding = ?1 WHERE id = ?2",
                )?;
                for (id, blob) in &rows {
                    updated += stmt.execute(params![blob, id])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    pub async fn news_count(&self) -> SyncResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM news_articles", [], |r| r.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    /// Delete articles published before `cutoff`. When `protected_codes` is
    /// given, an article whose related symbols overlap the set survives the
    /// purge. Returns the number of deleted rows.
    pub async fn cleanup_news(
        &self,
        cutoff: NaiveDateTime,
        protected_codes: Option<&HashSet<String>>,
    ) -> SyncResult<usize> {
        let cutoff = ts_text(cutoff);
        let Some(protected) = protected_codes else {
            return self
                .with_conn(move |conn| {
                    let n = conn.execute(
                        "DELETE FROM news_articles WHERE publish_time < ?1",
                        params![cutoff],
                    )?;
                    Ok(n)
                })
                .await;
        };

        // Overlap is evaluated in Rust: related_symbols is a flat comma list
        // and the watchlist is small.
        let protected = protected.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, related_symbols FROM news_articles WHERE publish_time < ?1",
            )?;
            let candidates = stmt
                .query_map(params![cutoff], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            let doomed: Vec<String> = candidates
                .into_iter()
                .filter(|(_, related)| {
                    !related.as_deref().is_some_and(|list| {
                        list.split(',').any(|code| protected.contains(code.trim()))
                    })
                })
                .map(|(id, _)| id)
                .collect();

            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut del = tx.prepare_cached("DELETE FROM news_articles WHERE id = ?1")?;
                for id in &doomed {
                    deleted += del.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn article(id: &str, days_old: i64, related: Option<&str>) -> NewsArticle {
        let base = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        NewsArticle {
            id: id.to_string(),
            title: format!("快讯 {id}"),
            body: Some("市场消息".to_string()),
            publish_time: base - chrono::Duration::days(days_old),
            source: "eastmoney".to_string(),
            url: Some(format!("https://example.com/news/{id}")),
            related_symbols: related.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn insert_dedups_on_native_id() {
        let store = Store::open_in_memory().unwrap();
        let rows = vec![article("a1", 0, None), article("a1", 0, None)];
        let outcome = store.insert_news(&rows).await.unwrap();
        assert_eq!(outcome.written, 1);
        assert_eq!(store.news_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cleanup_protects_watchlist_overlap() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_news(&[
                article("old_plain", 120, None),
                article("old_watched", 120, Some("600519,000001")),
                article("fresh", 1, None),
            ])
            .await
            .unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let protected: HashSet<String> = ["600519".to_string()].into_iter().collect();
        let deleted = store.cleanup_news(cutoff, Some(&protected)).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.news_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cleanup_without_protection_drops_all_old() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_news(&[
                article("old_plain", 120, None),
                article("old_watched", 120, Some("600519")),
            ])
            .await
            .unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let deleted = store.cleanup_news(cutoff, None).await.unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn embedding_backfill_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_news(&[article("a1", 2, None), article("a2", 1, None)])
            .await
            .unwrap();

        let pending = store.unembedded_news(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        // Oldest first.
        assert_eq!(pending[0].0, "a1");

        let blob = crate::feed::embedding::vector_to_blob(&[0.1, 0.2]);
        store
            .set_news_embeddings(&[("a1".to_string(), blob)])
            .await
            .unwrap();
        let pending = store.unembedded_news(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, "a2");
    }
}

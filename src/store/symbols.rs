//! Symbol master and watchlist repository.

use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};

use super::{bulk_write, now_text, BulkSpec, Store, WriteOutcome};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub code: String,
    pub name: String,
    pub market: String,
    pub asset_type: String,
    pub industry: Option<String>,
    pub list_date: Option<NaiveDate>,
    pub active: bool,
}

/// Per-symbol sync cursor used by the incremental daily-quotes pass.
#[derive(Debug, Clone)]
pub struct QuoteCursor {
    pub code: String,
    pub list_date: Option<NaiveDate>,
    pub last_trade_date: Option<NaiveDate>,
}

const UPSERT_SYMBOLS: BulkSpec = BulkSpec {
    insert_sql:
        "INSERT INTO symbols (code, name, market, asset_type, industry, list_date, active)",
    row_params: 7,
    conflict_sql: "ON CONFLICT(code) DO UPDATE SET \
         name = excluded.name, market = excluded.market, \
         asset_type = excluded.asset_type, \
         industry = COALESCE(excluded.industry, symbols.industry), \
         list_date = COALESCE(excluded.list_date, symbols.list_date), \
         active = excluded.active",
};

impl Store {
    pub async fn upsert_symbols(&self, rows: &[Symbol]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|s| {
                vec![
                    Value::from(s.code.clone()),
                    Value::from(s.name.clone()),
                    Value::from(s.market.clone()),
                    Value::from(s.asset_type.clone()),
                    Value::from(s.industry.clone()),
                    Value::from(s.list_date.map(|d| d.format("%Y-%m-%d").to_string())),
                    Value::from(i64::from(s.active)),
                ]
            })
            .collect();
        self.with_conn(move |conn| {
            bulk_write(conn, &UPSERT_SYMBOLS, values, crate::config::CHUNK_ROWS)
        })
        .await
    }

    /// Soft-deactivate everything absent from the upstream listing, and make
    /// sure everything present is active. Symbols are never hard-deleted.
    pub async fn reconcile_active_symbols(&self, present: &[String]) -> SyncResult<usize> {
        let present: Vec<String> = present.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "CREATE TEMP TABLE IF NOT EXISTS present_codes (code TEXT PRIMARY KEY); \
                 DELETE FROM present_codes;",
            )?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO present_codes (code) VALUES (?1)",
                )?;
                for code in &present {
                    stmt.execute(params![code])?;
                }
            }
            let deactivated = tx.execute(
                "UPDATE symbols SET active = 0 WHERE active = 1 \
                 AND code NOT IN (SELECT code FROM present_codes)",
                [],
            )?;
            tx.execute(
                "UPDATE symbols SET active = 1 WHERE active = 0 \
                 AND code IN (SELECT code FROM present_codes)",
                [],
            )?;
            tx.execute("DELETE FROM present_codes", [])?;
            tx.commit()?;
            Ok(deactivated)
        })
        .await
    }

    pub async fn active_codes(&self) -> SyncResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT code FROM symbols WHERE active = 1 ORDER BY code")?;
            let rows = stmt
                .query_map([], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn active_symbol_count(&self) -> SyncResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM symbols WHERE active = 1",
                [],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    pub async fn symbol(&self, code: &str) -> SyncResult<Option<Symbol>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT code, name, market, asset_type, industry, list_date, active \
                 FROM symbols WHERE code = ?1",
                params![code],
                |r| {
                    Ok(Symbol {
                        code: r.get(0)?,
                        name: r.get(1)?,
                        market: r.get(2)?,
                        asset_type: r.get(3)?,
                        industry: r.get(4)?,
                        list_date: r.get(5)?,
                        active: r.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()
            .map_err(SyncError::from)
        })
        .await
    }

    /// One row per active symbol with its listing date and newest stored
    /// bar, driving incremental range resolution in one query.
    pub async fn quote_cursors(&self) -> SyncResult<Vec<QuoteCursor>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT s.code, s.list_date, \
                        (SELECT MAX(b.trade_date) FROM daily_bars b WHERE b.code = s.code) \
                 FROM symbols s WHERE s.active = 1 ORDER BY s.code",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(QuoteCursor {
                        code: r.get(0)?,
                        list_date: r.get(1)?,
                        last_trade_date: r.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // -- watchlist ----------------------------------------------------------

    pub async fn watchlist_add(&self, code: &str) -> SyncResult<()> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO watchlist (code, added_at) VALUES (?1, ?2)",
                params![code, now_text()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn watchlist_remove(&self, code: &str) -> SyncResult<()> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM watchlist WHERE code = ?1", params![code])?;
            Ok(())
        })
        .await
    }

    pub async fn watchlist_codes(&self) -> SyncResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT code FROM watchlist ORDER BY code")?;
            let rows = stmt
                .query_map([], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn watchlist_set(&self) -> SyncResult<HashSet<String>> {
        Ok(self.watchlist_codes().await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(code: &str, industry: Option<&str>) -> Symbol {
        Symbol {
            code: code.to_string(),
            name: format!("股票{code}"),
            market: "SZ".to_string(),
            asset_type: "stock".to_string(),
            industry: industry.map(str::to_string),
            list_date: NaiveDate::from_ymd_opt(2010, 1, 4),
            active: true,
        }
    }

    #[tokio::test]
    async fn upsert_preserves_enrichment_on_null() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_symbols(&[sym("000001", Some("银行"))])
            .await
            .unwrap();

        // A later pass without industry must not wipe the stored value.
        store.upsert_symbols(&[sym("000001", None)]).await.unwrap();
        let s = store.symbol("000001").await.unwrap().unwrap();
        assert_eq!(s.industry.as_deref(), Some("银行"));
    }

    #[tokio::test]
    async fn reconcile_soft_deactivates_missing() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_symbols(&[sym("000001", None), sym("000002", None)])
            .await
            .unwrap();

        let deactivated = store
            .reconcile_active_symbols(&["000001".to_string()])
            .await
            .unwrap();
        assert_eq!(deactivated, 1);

        assert_eq!(store.active_codes().await.unwrap(), vec!["000001"]);
        // Row still exists — soft delete only.
        assert!(store.symbol("000002").await.unwrap().is_some());

        // Reappearing upstream reactivates.
        store
            .reconcile_active_symbols(&["000001".to_string(), "000002".to_string()])
            .await
            .unwrap();
        assert_eq!(store.active_symbol_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn watchlist_round_trip() {
        let store = Store::open_in_memory().unwrap();
        store.watchlist_add("600519").await.unwrap();
        store.watchlist_add("600519").await.unwrap();
        store.watchlist_add("000001").await.unwrap();
        assert_eq!(
            store.watchlist_codes().await.unwrap(),
            vec!["000001", "600519"]
        );
        store.watchlist_remove("600519").await.unwrap();
        assert_eq!(store.watchlist_codes().await.unwrap(), vec!["000001"]);
    }
}

//! Daily and minute bar repositories.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::params;
use rusqlite::types::Value;

use super::{bulk_write, now_text, BulkSpec, Store, WriteOutcome};
use crate::config::CHUNK_ROWS;
use crate::error::SyncResult;

#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub code: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub amount: f64,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
    pub turnover_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinuteBar {
    pub code: String,
    pub ts: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub amount: f64,
}

const UPSERT_DAILY: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO daily_bars (code, trade_date, open, high, low, close, volume, \
                 amount, change, change_pct, turnover_rate, updated_at)",
    row_params: 12,
    conflict_sql: "ON CONFLICT(code, trade_date) DO UPDATE SET \
         open = excluded.open, high = excluded.high, low = excluded.low, \
         close = excluded.close, volume = excluded.volume, amount = excluded.amount, \
         change = excluded.change, change_pct = excluded.change_pct, \
         turnover_rate = excluded.turnover_rate, updated_at = excluded.updated_at",
};

const UPSERT_MINUTE: BulkSpec = BulkSpec {
    insert_sql:
        "INSERT INTO minute_bars (code, ts, open, high, low, close, volume, amount)",
    row_params: 8,
    conflict_sql: "ON CONFLICT(code, ts) DO UPDATE SET \
         open = excluded.open, high = excluded.high, low = excluded.low, \
         close = excluded.close, volume = excluded.volume, amount = excluded.amount",
};

fn date_text(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn ts_text(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Store {
    pub async fn upsert_daily_bars(&self, rows: &[DailyBar]) -> SyncResult<WriteOutcome> {
        let stamp = now_text();
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|b| {
                vec![
                    Value::from(b.code.clone()),
                    Value::from(date_text(b.trade_date)),
                    Value::from(b.open),
                    Value::from(b.high),
                    Value::from(b.low),
                    Value::from(b.close),
                    Value::from(b.volume),
                    Value::from(b.amount),
                    Value::from(b.change),
                    Value::from(b.change_pct),
                    Value::from(b.turnover_rate),
                    Value::from(stamp.clone()),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_DAILY, values, CHUNK_ROWS))
            .await
    }

    pub async fn upsert_minute_bars(&self, rows: &[MinuteBar]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|b| {
                vec![
                    Value::from(b.code.clone()),
                    Value::from(ts_text(b.ts)),
                    Value::from(b.open),
                    Value::from(b.high),
                    Value::from(b.low),
                    Value::from(b.close),
                    Value::from(b.volume),
                    Value::from(b.amount),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_MINUTE, values, CHUNK_ROWS))
            .await
    }

    /// Bars for one symbol within an inclusive date range, oldest first.
    /// Always constrains `trade_date` so the scan stays on the partition.
    pub async fn daily_bars(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<Vec<DailyBar>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT code, trade_date, open, high, low, close, volume, amount, \
                        change, change_pct, turnover_rate \
                 FROM daily_bars \
                 WHERE code = ?1 AND trade_date >= ?2 AND trade_date <= ?3 \
                 ORDER BY trade_date",
            )?;
            let rows = stmt
                .query_map(
                    params![code, date_text(start), date_text(end)],
                    |r| {
                        Ok(DailyBar {
                            code: r.get(0)?,
                            trade_date: r.get(1)?,
                            open: r.get(2)?,
                            high: r.get(3)?,
                            low: r.get(4)?,
                            close: r.get(5)?,
                            volume: r.get(6)?,
                            amount: r.get(7)?,
                            change: r.get(8)?,
                            change_pct: r.get(9)?,
                            turnover_rate: r.get(10)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn daily_bar_count(&self) -> SyncResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM daily_bars", [], |r| r.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    /// Newest stored trade date across the whole dataset.
    pub async fn latest_trade_date(&self) -> SyncResult<Option<NaiveDate>> {
        self.with_conn(|conn| {
            let d: Option<NaiveDate> =
                conn.query_row("SELECT MAX(trade_date) FROM daily_bars", [], |r| r.get(0))?;
            Ok(d)
        })
        .await
    }

    /// Distinct codes having at least one bar on or after `since`.
    pub async fn codes_with_bars_since(&self, since: NaiveDate) -> SyncResult<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT code FROM daily_bars WHERE trade_date >= ?1",
            )?;
            let rows = stmt
                .query_map(params![date_text(since)], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Rows violating the bar invariants in the recent window; the doctor
    /// expects zero.
    pub async fn invalid_bar_count(&self, since: NaiveDate) -> SyncResult<usize> {
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM daily_bars WHERE trade_date >= ?1 AND ( \
                     low > open OR low > close OR high < open OR high < close \
                     OR high < low OR open <= 0 OR close <= 0 \
                     OR ABS(COALESCE(change_pct, 0)) > 30)",
                params![date_text(since)],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    /// Codes whose bars were rewritten after the symbol's newest indicator
    /// computation, i.e. the set the indicator syncer must revisit.
    pub async fn codes_with_stale_indicators(&self) -> SyncResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT b.code FROM daily_bars b \
                 GROUP BY b.code \
                 HAVING MAX(b.updated_at) > COALESCE( \
                     (SELECT MAX(t.computed_at) FROM tech_indicators t WHERE t.code = b.code), \
                     '')",
            )?;
            let rows = stmt
                .query_map([], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn bar(code: &str, date: (i32, u32, u32), close: f64) -> DailyBar {
        DailyBar {
            code: code.to_string(),
            trade_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            open: close - 0.1,
            high: close + 0.2,
            low: close - 0.3,
            close,
            volume: 1_000_000,
            amount: close * 1_000_000.0,
            change: Some(0.1),
            change_pct: Some(1.0),
            turnover_rate: Some(0.8),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let rows = vec![
            bar("000001", (2024, 1, 15), 10.0),
            bar("000001", (2024, 1, 16), 10.2),
        ];
        store.upsert_daily_bars(&rows).await.unwrap();
        store.upsert_daily_bars(&rows).await.unwrap();

        assert_eq!(store.daily_bar_count().await.unwrap(), 2);
        let read = store
            .daily_bars(
                "000001",
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].close, 10.2);
    }

    #[tokio::test]
    async fn upsert_overwrites_on_conflict() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_daily_bars(&[bar("000001", (2024, 1, 15), 10.0)])
            .await
            .unwrap();
        store
            .upsert_daily_bars(&[bar("000001", (2024, 1, 15), 11.5)])
            .await
            .unwrap();

        let read = store
            .daily_bars(
                "000001",
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].close, 11.5);
    }

    #[tokio::test]
    async fn stale_indicator_codes_track_bar_updates() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_daily_bars(&[bar("000001", (2024, 1, 15), 10.0)])
            .await
            .unwrap();
        // No indicators yet — the code is stale by definition.
        assert_eq!(
            store.codes_with_stale_indicators().await.unwrap(),
            vec!["000001"]
        );
    }
}

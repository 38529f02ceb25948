//! Technical indicator repository. Rows are derived purely from stored
//! daily bars; `computed_at` is compared against the bars' `updated_at` to
//! decide recomputation.

use chrono::NaiveDate;
use rusqlite::params;
use rusqlite::types::Value;

use super::{bulk_write, now_text, BulkSpec, Store, WriteOutcome};
use crate::config::CHUNK_ROWS;
use crate::error::SyncResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechIndicator {
    pub code: String,
    pub trade_date: NaiveDate,
    pub ma5: Option<f64>,
    pub ma10: Option<f64>,
    pub ma20: Option<f64>,
    pub ma60: Option<f64>,
    pub macd_dif: Option<f64>,
    pub macd_dea: Option<f64>,
    pub macd_hist: Option<f64>,
    pub rsi14: Option<f64>,
    pub kdj_k: Option<f64>,
    pub kdj_d: Option<f64>,
    pub kdj_j: Option<f64>,
    pub boll_upper: Option<f64>,
    pub boll_mid: Option<f64>,
    pub boll_lower: Option<f64>,
    pub cci14: Option<f64>,
    pub atr14: Option<f64>,
    pub obv: Option<f64>,
}

impl TechIndicator {
    pub fn new(code: &str, trade_date: NaiveDate) -> Self {
        Self {
            code: code.to_string(),
            trade_date,
            ..Default::default()
        }
    }
}

const UPSERT_INDICATORS: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO tech_indicators (code, trade_date, ma5, ma10, ma20, ma60, \
                 macd_dif, macd_dea, macd_hist, rsi14, kdj_k, kdj_d, kdj_j, \
                 boll_upper, boll_mid, boll_lower, cci14, atr14, obv, computed_at)",
    row_params: 20,
    conflict_sql: "ON CONFLICT(code, trade_date) DO UPDATE SET \
         ma5 = excluded.ma5, ma10 = excluded.ma10, ma20 = excluded.ma20, \
         ma60 = excluded.ma60, macd_dif = excluded.macd_dif, \
         macd_dea = excluded.macd_dea, macd_hist = excluded.macd_hist, \
         rsi14 = excluded.rsi14, kdj_k = excluded.kdj_k, kdj_d = excluded.kdj_d, \
         kdj_j = excluded.kdj_j, boll_upper = excluded.boll_upper, \
         boll_mid = excluded.boll_mid, boll_lower = excluded.boll_lower, \
         cci14 = excluded.cci14, atr14 = excluded.atr14, obv = excluded.obv, \
         computed_at = excluded.computed_at",
};

impl Store {
    pub async fn upsert_tech_indicators(
        &self,
        rows: &[TechIndicator],
    ) -> SyncResult<WriteOutcome> {
        let stamp = now_text();
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|t| {
                vec![
                    Value::from(t.code.clone()),
                    Value::from(t.trade_date.format("%Y-%m-%d").to_string()),
                    Value::from(t.ma5),
                    Value::from(t.ma10),
                    Value::from(t.ma20),
                    Value::from(t.ma60),
                    Value::from(t.macd_dif),
                    Value::from(t.macd_dea),
                    Value::from(t.macd_hist),
                    Value::from(t.rsi14),
                    Value::from(t.kdj_k),
                    Value::from(t.kdj_d),
                    Value::from(t.kdj_j),
                    Value::from(t.boll_upper),
                    Value::from(t.boll_mid),
                    Value::from(t.boll_lower),
                    Value::from(t.cci14),
                    Value::from(t.atr14),
                    Value::from(t.obv),
                    Value::from(stamp.clone()),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_INDICATORS, values, CHUNK_ROWS))
            .await
    }

    pub async fn tech_indicator_count(&self, code: &str) -> SyncResult<usize> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tech_indicators WHERE code = ?1",
                params![code],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    pub async fn tech_indicator(
        &self,
        code: &str,
        trade_date: NaiveDate,
    ) -> SyncResult<Option<TechIndicator>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT code, trade_date, ma5, ma10, ma20, ma60, macd_dif, macd_dea, \
                        macd_hist, rsi14, kdj_k, kdj_d, kdj_j, boll_upper, boll_mid, \
                        boll_lower, cci14, atr14, obv \
                 FROM tech_indicators WHERE code = ?1 AND trade_date = ?2",
                params![code, trade_date.format("%Y-%m-%d").to_string()],
                |r| {
                    Ok(TechIndicator {
                        code: r.get(0)?,
                        trade_date: r.get(1)?,
                        ma5: r.get(2)?,
                        ma10: r.get(3)?,
                        ma20: r.get(4)?,
                        ma60: r.get(5)?,
                        macd_dif: r.get(6)?,
                        macd_dea: r.get(7)?,
                        macd_hist: r.get(8)?,
                        rsi14: r.get(9)?,
                        kdj_k: r.get(10)?,
                        kdj_d: r.get(11)?,
                        kdj_j: r.get(12)?,
                        boll_upper: r.get(13)?,
                        boll_mid: r.get(14)?,
                        boll_lower: r.get(15)?,
                        cci14: r.get(16)?,
                        atr14: r.get(17)?,
                        obv: r.get(18)?,
                    })
                },
            )
            .optional()
            .map_err(crate::error::SyncError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn indicator_upsert_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let mut row = TechIndicator::new("600519", date);
        row.ma5 = Some(1701.2);
        row.rsi14 = Some(55.0);

        store.upsert_tech_indicators(&[row.clone()]).await.unwrap();
        row.rsi14 = Some(60.0);
        store.upsert_tech_indicators(&[row]).await.unwrap();

        assert_eq!(store.tech_indicator_count("600519").await.unwrap(), 1);
        let read = store
            .tech_indicator("600519", date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.rsi14, Some(60.0));
        assert_eq!(read.ma5, Some(1701.2));
    }
}

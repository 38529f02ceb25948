//! Financial report and valuation repositories.

use chrono::NaiveDate;
use rusqlite::types::Value;

use super::{bulk_write, BulkSpec, Store, WriteOutcome};
use crate::config::CHUNK_ROWS;
use crate::error::SyncResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Financial {
    pub code: String,
    pub end_date: NaiveDate,
    pub pub_date: NaiveDate,
    pub revenue: Option<f64>,
    pub net_profit: Option<f64>,
    pub eps: Option<f64>,
    pub roe: Option<f64>,
    pub gross_margin: Option<f64>,
    pub debt_ratio: Option<f64>,
    pub ocf_per_share: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub code: String,
    pub trade_date: NaiveDate,
    pub pe_ttm: Option<f64>,
    pub pb: Option<f64>,
    pub ps_ttm: Option<f64>,
    pub peg: Option<f64>,
    pub total_mv: Option<f64>,
    pub circ_mv: Option<f64>,
    pub dividend_yield: Option<f64>,
}

const UPSERT_FINANCIALS: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO financials (code, end_date, pub_date, revenue, net_profit, eps, \
                 roe, gross_margin, debt_ratio, ocf_per_share)",
    row_params: 10,
    conflict_sql: "ON CONFLICT(code, end_date) DO UPDATE SET \
         pub_date = excluded.pub_date, revenue = excluded.revenue, \
         net_profit = excluded.net_profit, eps = excluded.eps, roe = excluded.roe, \
         gross_margin = excluded.gross_margin, debt_ratio = excluded.debt_ratio, \
         ocf_per_share = excluded.ocf_per_share",
};

const UPSERT_VALUATIONS: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO valuations (code, trade_date, pe_ttm, pb, ps_ttm, peg, \
                 total_mv, circ_mv, dividend_yield)",
    row_params: 9,
    conflict_sql: "ON CONFLICT(code, trade_date) DO UPDATE SET \
         pe_ttm = excluded.pe_ttm, pb = excluded.pb, ps_ttm = excluded.ps_ttm, \
         peg = excluded.peg, total_mv = excluded.total_mv, circ_mv = excluded.circ_mv, \
         dividend_yield = excluded.dividend_yield",
};

fn date_text(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

impl Store {
    pub async fn upsert_financials(&self, rows: &[Financial]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|f| {
                vec![
                    Value::from(f.code.clone()),
                    Value::from(date_text(f.end_date)),
                    Value::from(date_text(f.pub_date)),
                    Value::from(f.revenue),
                    Value::from(f.net_profit),
                    Value::from(f.eps),
                    Value::from(f.roe),
                    Value::from(f.gross_margin),
                    Value::from(f.debt_ratio),
                    Value::from(f.ocf_per_share),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_FINANCIALS, values, CHUNK_ROWS))
            .await
    }

    pub async fn upsert_valuations(&self, rows: &[Valuation]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|v| {
                vec![
                    Value::from(v.code.clone()),
                    Value::from(date_text(v.trade_date)),
                    Value::from(v.pe_ttm),
                    Value::from(v.pb),
                    Value::from(v.ps_ttm),
                    Value::from(v.peg),
                    Value::from(v.total_mv),
                    Value::from(v.circ_mv),
                    Value::from(v.dividend_yield),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_VALUATIONS, values, CHUNK_ROWS))
            .await
    }

    /// Distinct codes with at least one valuation row on or after `since`.
    pub async fn codes_with_valuations_since(
        &self,
        since: NaiveDate,
    ) -> SyncResult<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT code FROM valuations WHERE trade_date >= ?1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![date_text(since)], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn financial_count(&self, code: &str) -> SyncResult<usize> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM financials WHERE code = ?1",
                rusqlite::params![code],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fin(code: &str, end: (i32, u32, u32)) -> Financial {
        Financial {
            code: code.to_string(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            pub_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap() + chrono::Duration::days(30),
            revenue: Some(1.0e9),
            net_profit: Some(2.0e8),
            eps: Some(0.35),
            roe: Some(11.2),
            gross_margin: Some(42.0),
            debt_ratio: Some(55.0),
            ocf_per_share: Some(0.8),
        }
    }

    #[tokio::test]
    async fn financials_dedup_on_code_end_date() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_financials(&[fin("000001", (2024, 3, 31)), fin("000001", (2024, 6, 30))])
            .await
            .unwrap();
        store
            .upsert_financials(&[fin("000001", (2024, 6, 30))])
            .await
            .unwrap();
        assert_eq!(store.financial_count("000001").await.unwrap(), 2);
    }
}

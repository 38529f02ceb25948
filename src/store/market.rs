//! Post-close market aggregate repositories: fund flow, margin, dragon
//! tiger, northbound flow, sentiment, limit-up pool, sectors.

use chrono::NaiveDate;
use rusqlite::params;
use rusqlite::types::Value;

use super::{bulk_write, BulkSpec, Store, WriteOutcome};
use crate::config::CHUNK_ROWS;
use crate::error::SyncResult;

fn date_text(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundFlow {
    pub code: String,
    pub trade_date: NaiveDate,
    pub main_net: Option<f64>,
    pub super_net: Option<f64>,
    pub large_net: Option<f64>,
    pub medium_net: Option<f64>,
    pub small_net: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Margin {
    pub code: String,
    pub trade_date: NaiveDate,
    pub financing_balance: Option<f64>,
    pub financing_buy: Option<f64>,
    pub securities_balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragonTiger {
    pub code: String,
    pub trade_date: NaiveDate,
    pub reason: String,
    pub net_buy: Option<f64>,
    pub buy_amount: Option<f64>,
    pub sell_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NorthboundFlow {
    pub trade_date: NaiveDate,
    pub net_inflow: Option<f64>,
    pub buy_amount: Option<f64>,
    pub sell_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSentiment {
    pub trade_date: NaiveDate,
    pub up_count: Option<i64>,
    pub down_count: Option<i64>,
    pub limit_up_count: Option<i64>,
    pub limit_down_count: Option<i64>,
    pub turnover: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitUpStock {
    pub code: String,
    pub trade_date: NaiveDate,
    pub reason: Option<String>,
    pub streak: Option<i64>,
    pub seal_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectorQuote {
    pub sector_code: String,
    pub name: String,
    pub kind: String,
    pub trade_date: NaiveDate,
    pub close: Option<f64>,
    pub change_pct: Option<f64>,
    pub turnover: Option<f64>,
    pub leader_code: Option<String>,
}

const UPSERT_FUND_FLOWS: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO fund_flows (code, trade_date, main_net, super_net, large_net, \
                 medium_net, small_net)",
    row_params: 7,
    conflict_sql: "ON CONFLICT(code, trade_date) DO UPDATE SET \
         main_net = excluded.main_net, super_net = excluded.super_net, \
         large_net = excluded.large_net, medium_net = excluded.medium_net, \
         small_net = excluded.small_net",
};

const UPSERT_MARGINS: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO margins (code, trade_date, financing_balance, financing_buy, \
                 securities_balance)",
    row_params: 5,
    conflict_sql: "ON CONFLICT(code, trade_date) DO UPDATE SET \
         financing_balance = excluded.financing_balance, \
         financing_buy = excluded.financing_buy, \
         securities_balance = excluded.securities_balance",
};

/// Dragon-tiger rows are append-only; replays are ignored, never rewritten.
const INSERT_DRAGON_TIGER: BulkSpec = BulkSpec {
    insert_sql: "INSERT OR IGNORE INTO dragon_tiger (code, trade_date, reason, net_buy, \
                 buy_amount, sell_amount)",
    row_params: 6,
    conflict_sql: "",
};

const UPSERT_LIMIT_UP: BulkSpec = BulkSpec {
    insert_sql:
        "INSERT INTO limit_up_stocks (code, trade_date, reason, streak, seal_amount)",
    row_params: 5,
    conflict_sql: "ON CONFLICT(code, trade_date) DO UPDATE SET \
         reason = excluded.reason, streak = excluded.streak, \
         seal_amount = excluded.seal_amount",
};

const UPSERT_SECTORS: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO sectors (code, name, kind)",
    row_params: 3,
    conflict_sql: "ON CONFLICT(code) DO UPDATE SET name = excluded.name, kind = excluded.kind",
};

const UPSERT_SECTOR_QUOTES: BulkSpec = BulkSpec {
    insert_sql: "INSERT INTO sector_quotes (sector_code, trade_date, close, change_pct, \
                 turnover, leader_code)",
    row_params: 6,
    conflict_sql: "ON CONFLICT(sector_code, trade_date) DO UPDATE SET \
         close = excluded.close, change_pct = excluded.change_pct, \
         turnover = excluded.turnover, leader_code = excluded.leader_code",
};

impl Store {
    pub async fn upsert_fund_flows(&self, rows: &[FundFlow]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.code.clone()),
                    Value::from(date_text(r.trade_date)),
                    Value::from(r.main_net),
                    Value::from(r.super_net),
                    Value::from(r.large_net),
                    Value::from(r.medium_net),
                    Value::from(r.small_net),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_FUND_FLOWS, values, CHUNK_ROWS))
            .await
    }

    pub async fn upsert_margins(&self, rows: &[Margin]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.code.clone()),
                    Value::from(date_text(r.trade_date)),
                    Value::from(r.financing_balance),
                    Value::from(r.financing_buy),
                    Value::from(r.securities_balance),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_MARGINS, values, CHUNK_ROWS))
            .await
    }

    pub async fn insert_dragon_tiger(&self, rows: &[DragonTiger]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.code.clone()),
                    Value::from(date_text(r.trade_date)),
                    Value::from(r.reason.clone()),
                    Value::from(r.net_buy),
                    Value::from(r.buy_amount),
                    Value::from(r.sell_amount),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &INSERT_DRAGON_TIGER, values, CHUNK_ROWS))
            .await
    }

    pub async fn upsert_northbound_flow(&self, row: &NorthboundFlow) -> SyncResult<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO northbound_flows (trade_date, net_inflow, buy_amount, sell_amount) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(trade_date) DO UPDATE SET \
                     net_inflow = excluded.net_inflow, buy_amount = excluded.buy_amount, \
                     sell_amount = excluded.sell_amount",
                params![
                    date_text(row.trade_date),
                    row.net_inflow,
                    row.buy_amount,
                    row.sell_amount
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_market_sentiment(&self, row: &MarketSentiment) -> SyncResult<()> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO market_sentiments \
                     (trade_date, up_count, down_count, limit_up_count, limit_down_count, turnover) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(trade_date) DO UPDATE SET \
                     up_count = excluded.up_count, down_count = excluded.down_count, \
                     limit_up_count = excluded.limit_up_count, \
                     limit_down_count = excluded.limit_down_count, \
                     turnover = excluded.turnover",
                params![
                    date_text(row.trade_date),
                    row.up_count,
                    row.down_count,
                    row.limit_up_count,
                    row.limit_down_count,
                    row.turnover
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_limit_up_stocks(&self, rows: &[LimitUpStock]) -> SyncResult<WriteOutcome> {
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.code.clone()),
                    Value::from(date_text(r.trade_date)),
                    Value::from(r.reason.clone()),
                    Value::from(r.streak),
                    Value::from(r.seal_amount),
                ]
            })
            .collect();
        self.with_conn(move |conn| bulk_write(conn, &UPSERT_LIMIT_UP, values, CHUNK_ROWS))
            .await
    }

    /// Sector master and daily index in one call — quotes carry the board
    /// identity with them.
    pub async fn upsert_sector_quotes(&self, rows: &[SectorQuote]) -> SyncResult<WriteOutcome> {
        let sectors: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.sector_code.clone()),
                    Value::from(r.name.clone()),
                    Value::from(r.kind.clone()),
                ]
            })
            .collect();
        let quotes: Vec<Vec<Value>> = rows
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.sector_code.clone()),
                    Value::from(date_text(r.trade_date)),
                    Value::from(r.close),
                    Value::from(r.change_pct),
                    Value::from(r.turnover),
                    Value::from(r.leader_code.clone()),
                ]
            })
            .collect();
        self.with_conn(move |conn| {
            bulk_write(conn, &UPSERT_SECTORS, sectors, CHUNK_ROWS)?;
            bulk_write(conn, &UPSERT_SECTOR_QUOTES, quotes, CHUNK_ROWS)
        })
        .await
    }

    pub async fn dragon_tiger_count(&self, date: NaiveDate) -> SyncResult<usize> {
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM dragon_tiger WHERE trade_date = ?1",
                params![date_text(date)],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }
}

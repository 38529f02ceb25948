//! Post-close market aggregate syncers: one snapshot fetch per dataset,
//! stamped with the trade date and upserted idempotently.

use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::store::financials::Valuation;
use crate::store::market::{
    DragonTiger, FundFlow, LimitUpStock, Margin, MarketSentiment, NorthboundFlow, SectorQuote,
};
use crate::transform::{opt_f64_col, opt_i64_col, opt_str_col, require_cols};

use super::{Scope, SyncContext, SyncStats, Syncer};

fn scope_date(scope: &Scope) -> NaiveDate {
    match scope {
        Scope::Date(d) => *d,
        _ => chrono::Local::now().date_naive(),
    }
}

/// Fetch a snapshot frame, treating an empty upstream answer (non-trading
/// day, data not out yet) as a clean zero-row run.
async fn snapshot(
    fetch: impl std::future::Future<Output = SyncResult<DataFrame>>,
) -> SyncResult<Option<DataFrame>> {
    match fetch.await {
        Ok(df) => Ok(Some(df)),
        Err(SyncError::Empty) => Ok(None),
        Err(e) => Err(e),
    }
}

fn stats(fetched: usize, accepted: usize, written: usize) -> SyncStats {
    SyncStats {
        fetched,
        accepted,
        written,
        errors: 0,
    }
}

// ---------------------------------------------------------------------------
// Valuations
// ---------------------------------------------------------------------------

pub struct ValuationsSyncer;

#[async_trait]
impl Syncer for ValuationsSyncer {
    fn name(&self) -> &'static str {
        "valuations"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.valuation_snapshot()).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["code"])?;

        let codes = opt_str_col(&df, "code")?;
        let pe = opt_f64_col(&df, "pe_ttm")?;
        let pb = opt_f64_col(&df, "pb")?;
        let ps = opt_f64_col(&df, "ps_ttm")?;
        let total_mv = opt_f64_col(&df, "total_mv")?;
        let circ_mv = opt_f64_col(&df, "circ_mv")?;
        let dy = opt_f64_col(&df, "dividend_yield")?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let Some(code) = codes[i].clone() else { continue };
            rows.push(Valuation {
                code,
                trade_date: date,
                pe_ttm: pe[i],
                pb: pb[i],
                ps_ttm: ps[i],
                peg: None,
                total_mv: total_mv[i],
                circ_mv: circ_mv[i],
                dividend_yield: dy[i],
            });
        }
        let accepted = rows.len();
        let outcome = ctx.store.upsert_valuations(&rows).await?;
        Ok(stats(df.height(), accepted, outcome.written))
    }
}

// ---------------------------------------------------------------------------
// Fund flow
// ---------------------------------------------------------------------------

pub struct FundFlowSyncer;

#[async_trait]
impl Syncer for FundFlowSyncer {
    fn name(&self) -> &'static str {
        "fund_flow"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.fund_flow_rank()).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["code", "main_net"])?;

        let codes = opt_str_col(&df, "code")?;
        let main = opt_f64_col(&df, "main_net")?;
        let super_ = opt_f64_col(&df, "super_net")?;
        let large = opt_f64_col(&df, "large_net")?;
        let medium = opt_f64_col(&df, "medium_net")?;
        let small = opt_f64_col(&df, "small_net")?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let Some(code) = codes[i].clone() else { continue };
            rows.push(FundFlow {
                code,
                trade_date: date,
                main_net: main[i],
                super_net: super_[i],
                large_net: large[i],
                medium_net: medium[i],
                small_net: small[i],
            });
        }
        let accepted = rows.len();
        let outcome = ctx.store.upsert_fund_flows(&rows).await?;
        Ok(stats(df.height(), accepted, outcome.written))
    }
}

// ---------------------------------------------------------------------------
// Margin balances
// ---------------------------------------------------------------------------

pub struct MarginSyncer;

#[async_trait]
impl Syncer for MarginSyncer {
    fn name(&self) -> &'static str {
        "margin"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.margin_summary(date)).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["code", "financing_balance"])?;

        let codes = opt_str_col(&df, "code")?;
        let balance = opt_f64_col(&df, "financing_balance")?;
        let buy = opt_f64_col(&df, "financing_buy")?;
        let securities = opt_f64_col(&df, "securities_balance")?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let Some(code) = codes[i].clone() else { continue };
            rows.push(Margin {
                code,
                trade_date: date,
                financing_balance: balance[i],
                financing_buy: buy[i],
                securities_balance: securities[i],
            });
        }
        let accepted = rows.len();
        let outcome = ctx.store.upsert_margins(&rows).await?;
        Ok(stats(df.height(), accepted, outcome.written))
    }
}

// ---------------------------------------------------------------------------
// Dragon-tiger board
// ---------------------------------------------------------------------------

pub struct DragonTigerSyncer;

#[async_trait]
impl Syncer for DragonTigerSyncer {
    fn name(&self) -> &'static str {
        "dragon_tiger"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.dragon_tiger(date)).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["code", "reason"])?;

        let codes = opt_str_col(&df, "code")?;
        let reasons = opt_str_col(&df, "reason")?;
        let net = opt_f64_col(&df, "net_buy")?;
        let buy = opt_f64_col(&df, "buy_amount")?;
        let sell = opt_f64_col(&df, "sell_amount")?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let (Some(code), Some(reason)) = (codes[i].clone(), reasons[i].clone()) else {
                continue;
            };
            rows.push(DragonTiger {
                code,
                trade_date: date,
                reason,
                net_buy: net[i],
                buy_amount: buy[i],
                sell_amount: sell[i],
            });
        }
        let accepted = rows.len();
        let outcome = ctx.store.insert_dragon_tiger(&rows).await?;
        Ok(stats(df.height(), accepted, outcome.written))
    }
}

// ---------------------------------------------------------------------------
// Northbound flow
// ---------------------------------------------------------------------------

pub struct NorthboundSyncer;

#[async_trait]
impl Syncer for NorthboundSyncer {
    fn name(&self) -> &'static str {
        "northbound_flow"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.northbound_flow()).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["net_inflow"])?;

        let net = opt_f64_col(&df, "net_inflow")?;
        let buy = opt_f64_col(&df, "buy_amount")?;
        let sell = opt_f64_col(&df, "sell_amount")?;
        let row = NorthboundFlow {
            trade_date: date,
            net_inflow: net.first().copied().flatten(),
            buy_amount: buy.first().copied().flatten(),
            sell_amount: sell.first().copied().flatten(),
        };
        ctx.store.upsert_northbound_flow(&row).await?;
        Ok(stats(1, 1, 1))
    }
}

// ---------------------------------------------------------------------------
// Market sentiment
// ---------------------------------------------------------------------------

pub struct SentimentSyncer;

#[async_trait]
impl Syncer for SentimentSyncer {
    fn name(&self) -> &'static str {
        "market_sentiment"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.market_sentiment(date)).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["up_count", "down_count"])?;

        let up = opt_i64_col(&df, "up_count")?;
        let down = opt_i64_col(&df, "down_count")?;
        let limit_up = opt_i64_col(&df, "limit_up_count")?;
        let limit_down = opt_i64_col(&df, "limit_down_count")?;
        let turnover = opt_f64_col(&df, "turnover")?;

        let row = MarketSentiment {
            trade_date: date,
            up_count: up.first().copied().flatten(),
            down_count: down.first().copied().flatten(),
            limit_up_count: limit_up.first().copied().flatten(),
            limit_down_count: limit_down.first().copied().flatten(),
            turnover: turnover.first().copied().flatten(),
        };
        ctx.store.upsert_market_sentiment(&row).await?;
        Ok(stats(1, 1, 1))
    }
}

// ---------------------------------------------------------------------------
// Limit-up pool
// ---------------------------------------------------------------------------

pub struct LimitUpSyncer;

#[async_trait]
impl Syncer for LimitUpSyncer {
    fn name(&self) -> &'static str {
        "limit_up"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.limit_up_pool(date)).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["code"])?;

        let codes = opt_str_col(&df, "code")?;
        let reasons = opt_str_col(&df, "reason")?;
        let streaks = opt_i64_col(&df, "streak")?;
        let seals = opt_f64_col(&df, "seal_amount")?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let Some(code) = codes[i].clone() else { continue };
            rows.push(LimitUpStock {
                code,
                trade_date: date,
                reason: reasons[i].clone(),
                streak: streaks[i],
                seal_amount: seals[i],
            });
        }
        let accepted = rows.len();
        let outcome = ctx.store.upsert_limit_up_stocks(&rows).await?;
        Ok(stats(df.height(), accepted, outcome.written))
    }
}

// ---------------------------------------------------------------------------
// Sector quotes
// ---------------------------------------------------------------------------

pub struct SectorQuotesSyncer;

#[async_trait]
impl Syncer for SectorQuotesSyncer {
    fn name(&self) -> &'static str {
        "sector_quotes"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        _cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let date = scope_date(&scope);
        let Some(df) = snapshot(ctx.feed.sector_quotes()).await? else {
            return Ok(SyncStats::default());
        };
        require_cols(&df, &["sector_code", "name", "kind"])?;

        let codes = opt_str_col(&df, "sector_code")?;
        let names = opt_str_col(&df, "name")?;
        let kinds = opt_str_col(&df, "kind")?;
        let closes = opt_f64_col(&df, "close")?;
        let pcts = opt_f64_col(&df, "change_pct")?;
        let turnovers = opt_f64_col(&df, "turnover")?;
        let leaders = opt_str_col(&df, "leader_code")?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let (Some(sector_code), Some(name), Some(kind)) =
                (codes[i].clone(), names[i].clone(), kinds[i].clone())
            else {
                continue;
            };
            rows.push(SectorQuote {
                sector_code,
                name,
                kind,
                trade_date: date,
                close: closes[i],
                change_pct: pcts[i],
                turnover: turnovers[i],
                leader_code: leaders[i].clone(),
            });
        }
        let accepted = rows.len();
        let outcome = ctx.store.upsert_sector_quotes(&rows).await?;
        Ok(stats(df.height(), accepted, outcome.written))
    }
}

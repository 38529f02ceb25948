//! Upstream market-data feed abstraction.
//!
//! One method per logical dataset, each returning a uniform columnar frame.
//! The production implementation ([`eastmoney::EastmoneyFeed`]) absorbs
//! upstream schema drift by naming-based field lookup; consumers only ever
//! see the documented frame schemas below. Every outbound call goes through
//! the [`gate::GatedFeed`] decorator, which owns throttling and retry.

pub mod eastmoney;
pub mod embedding;
pub mod gate;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::DataFrame;

use crate::error::SyncResult;

/// Upstream feed contract. All frames use canonical column names; the
/// per-method docs list the guaranteed columns.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// All listed symbols. Columns: `code`, `name`, `market`, `asset_type`.
    async fn symbol_list(&self) -> SyncResult<DataFrame>;

    /// Secondary enrichment source. Columns: `code`, `industry`, `list_date`.
    async fn symbol_industry(&self) -> SyncResult<DataFrame>;

    /// Daily OHLCV for one symbol, inclusive range. Columns: `trade_date`,
    /// `open`, `close`, `high`, `low`, `volume`, `amount`, `change_pct`,
    /// `change`, `turnover_rate`.
    async fn daily_bars(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<DataFrame>;

    /// Current-session 1-minute bars for one symbol. Columns: `ts`, `open`,
    /// `close`, `high`, `low`, `volume`, `amount`.
    async fn minute_bars(&self, code: &str) -> SyncResult<DataFrame>;

    /// Realtime snapshot for one symbol. Columns: `code`, `price`, `open`,
    /// `high`, `low`, `volume`, `amount`, `change_pct`.
    async fn realtime_quote(&self, code: &str) -> SyncResult<DataFrame>;

    /// Quarterly report history for one symbol. Columns: `end_date`,
    /// `pub_date`, `revenue`, `net_profit`, `eps`, `roe`, `gross_margin`,
    /// `debt_ratio`, `ocf_per_share`.
    async fn financials(&self, code: &str) -> SyncResult<DataFrame>;

    /// Market-wide valuation snapshot. Columns: `code`, `pe_ttm`, `pb`,
    /// `ps_ttm`, `total_mv`, `circ_mv`, `dividend_yield`.
    async fn valuation_snapshot(&self) -> SyncResult<DataFrame>;

    /// Market-wide fund-flow ranking. Columns: `code`, `main_net`,
    /// `super_net`, `large_net`, `medium_net`, `small_net`.
    async fn fund_flow_rank(&self) -> SyncResult<DataFrame>;

    /// Margin trading balances for a date. Columns: `code`,
    /// `financing_balance`, `financing_buy`, `securities_balance`.
    async fn margin_summary(&self, date: NaiveDate) -> SyncResult<DataFrame>;

    /// Dragon-tiger board detail for a date. Columns: `code`, `reason`,
    /// `net_buy`, `buy_amount`, `sell_amount`.
    async fn dragon_tiger(&self, date: NaiveDate) -> SyncResult<DataFrame>;

    /// Northbound (HK connect) flow snapshot. Columns: `net_inflow`,
    /// `buy_amount`, `sell_amount`.
    async fn northbound_flow(&self) -> SyncResult<DataFrame>;

    /// Advance/decline distribution for a date. Columns: `up_count`,
    /// `down_count`, `limit_up_count`, `limit_down_count`, `turnover`.
    async fn market_sentiment(&self, date: NaiveDate) -> SyncResult<DataFrame>;

    /// Limit-up pool for a date. Columns: `code`, `reason`, `streak`,
    /// `seal_amount`.
    async fn limit_up_pool(&self, date: NaiveDate) -> SyncResult<DataFrame>;

    /// Industry/concept board daily index. Columns: `sector_code`, `name`,
    /// `kind`, `close`, `change_pct`, `turnover`, `leader_code`.
    async fn sector_quotes(&self) -> SyncResult<DataFrame>;

    /// Fast-news feed entries published after `since`. Columns: `id`,
    /// `title`, `body`, `publish_time`, `source`, `url`, `related_symbols`.
    async fn news_since(&self, since: NaiveDateTime) -> SyncResult<DataFrame>;
}

/// Shared handles delegate, so a `GatedFeed` can wrap an `Arc<F>` that the
/// caller keeps a handle to (tests count calls this way).
#[async_trait]
impl<F: MarketFeed + ?Sized> MarketFeed for Arc<F> {
    async fn symbol_list(&self) -> SyncResult<DataFrame> {
        (**self).symbol_list().await
    }
    async fn symbol_industry(&self) -> SyncResult<DataFrame> {
        (**self).symbol_industry().await
    }
    async fn daily_bars(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<DataFrame> {
        (**self).daily_bars(code, start, end).await
    }
    async fn minute_bars(&self, code: &str) -> SyncResult<DataFrame> {
        (**self).minute_bars(code).await
    }
    async fn realtime_quote(&self, code: &str) -> SyncResult<DataFrame> {
        (**self).realtime_quote(code).await
    }
    async fn financials(&self, code: &str) -> SyncResult<DataFrame> {
        (**self).financials(code).await
    }
    async fn valuation_snapshot(&self) -> SyncResult<DataFrame> {
        (**self).valuation_snapshot().await
    }
    async fn fund_flow_rank(&self) -> SyncResult<DataFrame> {
        (**self).fund_flow_rank().await
    }
    async fn margin_summary(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        (**self).margin_summary(date).await
    }
    async fn dragon_tiger(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        (**self).dragon_tiger(date).await
    }
    async fn northbound_flow(&self) -> SyncResult<DataFrame> {
        (**self).northbound_flow().await
    }
    async fn market_sentiment(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        (**self).market_sentiment(date).await
    }
    async fn limit_up_pool(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        (**self).limit_up_pool(date).await
    }
    async fn sector_quotes(&self) -> SyncResult<DataFrame> {
        (**self).sector_quotes().await
    }
    async fn news_since(&self, since: NaiveDateTime) -> SyncResult<DataFrame> {
        (**self).news_since(since).await
    }
}

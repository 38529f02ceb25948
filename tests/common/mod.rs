#![allow(dead_code)]

//! Shared fixtures: a scripted mock feed, an in-memory store, and frame
//! builders shaped exactly like the production adapter's output.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;

use async_trait::async_trait;

use leeksaver::config::Settings;
use leeksaver::error::{SyncError, SyncResult};
use leeksaver::feed::MarketFeed;
use leeksaver::store::symbols::Symbol;
use leeksaver::store::Store;
use leeksaver::sync::SyncContext;

/// Scripted upstream: per-code daily frames, an optional failure queue per
/// code, and a call counter. Range arguments are ignored so fixtures stay
/// independent of the wall clock.
#[derive(Default)]
pub struct MockFeed {
    pub daily: std::sync::Mutex<HashMap<String, DataFrame>>,
    pub daily_failures: std::sync::Mutex<HashMap<String, VecDeque<SyncError>>>,
    pub daily_calls: AtomicU32,
    /// Simulated upstream latency per call.
    pub latency: Duration,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn set_daily(&self, code: &str, frame: DataFrame) {
        self.daily
            .lock()
            .unwrap()
            .insert(code.to_string(), frame);
    }

    /// Queue failures consumed before any data is returned for `code`.
    pub fn fail_daily(&self, code: &str, failures: Vec<SyncError>) {
        self.daily_failures
            .lock()
            .unwrap()
            .entry(code.to_string())
            .or_default()
            .extend(failures);
    }
}

#[async_trait]
impl MarketFeed for MockFeed {
    async fn symbol_list(&self) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn symbol_industry(&self) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn daily_bars(
        &self,
        code: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> SyncResult<DataFrame> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(queue) = self.daily_failures.lock().unwrap().get_mut(code) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        match self.daily.lock().unwrap().get(code) {
            Some(df) => Ok(df.clone()),
            None => Err(SyncError::Empty),
        }
    }

    async fn minute_bars(&self, _code: &str) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn realtime_quote(&self, _code: &str) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn financials(&self, _code: &str) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn valuation_snapshot(&self) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn fund_flow_rank(&self) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn margin_summary(&self, _date: NaiveDate) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn dragon_tiger(&self, _date: NaiveDate) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn northbound_flow(&self) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn market_sentiment(&self, _date: NaiveDate) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn limit_up_pool(&self, _date: NaiveDate) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn sector_quotes(&self) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }

    async fn news_since(&self, _since: NaiveDateTime) -> SyncResult<DataFrame> {
        Err(SyncError::Empty)
    }
}

/// Daily frame in the adapter's canonical schema, one row per date.
pub fn daily_frame(dates: &[&str], base_price: f64) -> DataFrame {
    let n = dates.len();
    let opens: Vec<f64> = (0..n).map(|i| base_price + i as f64 * 0.1).collect();
    let closes: Vec<f64> = opens.iter().map(|o| o + 0.2).collect();
    let highs: Vec<f64> = closes.iter().map(|c| c + 0.3).collect();
    let lows: Vec<f64> = opens.iter().map(|o| o - 0.3).collect();
    df! {
        "trade_date" => dates,
        "open" => &opens,
        "close" => &closes,
        "high" => &highs,
        "low" => &lows,
        "volume" => &vec![1_000_000.0f64; n],
        "amount" => &vec![10_500_000.0f64; n],
        "change_pct" => &vec![1.5f64; n],
        "change" => &vec![0.2f64; n],
        "turnover_rate" => &vec![0.9f64; n],
    }
    .unwrap()
}

/// One OHLC row with an inverted range (`high < low`).
pub fn inverted_frame(date: &str) -> DataFrame {
    df! {
        "trade_date" => &[date],
        "open" => &[9.5f64],
        "close" => &[9.5f64],
        "high" => &[9.0f64],
        "low" => &[10.0f64],
        "volume" => &[1_000.0f64],
        "amount" => &[9_500.0f64],
        "change_pct" => &[0.0f64],
        "change" => &[0.0f64],
        "turnover_rate" => &[0.1f64],
    }
    .unwrap()
}

pub fn symbol(code: &str) -> Symbol {
    Symbol {
        code: code.to_string(),
        name: format!("股票{code}"),
        market: if code.starts_with('6') { "SH" } else { "SZ" }.to_string(),
        asset_type: "stock".to_string(),
        industry: None,
        list_date: NaiveDate::from_ymd_opt(2015, 1, 5),
        active: true,
    }
}

pub async fn seed_symbols(store: &Store, codes: &[&str]) {
    let symbols: Vec<Symbol> = codes.iter().map(|c| symbol(c)).collect();
    store.upsert_symbols(&symbols).await.unwrap();
}

pub async fn seeded_store(codes: &[&str]) -> Arc<Store> {
    let store = Arc::new(Store::open_in_memory().unwrap());
    seed_symbols(&store, codes).await;
    store
}

/// File-backed store in a temp dir, exercising the on-disk open path (WAL
/// pragmas included).
pub fn file_store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("leeksaver.db")).unwrap();
    (dir, Arc::new(store))
}

pub fn test_ctx(feed: Arc<dyn MarketFeed>, store: Arc<Store>) -> Arc<SyncContext> {
    Arc::new(SyncContext {
        feed,
        store,
        settings: Settings::default(),
        embedder: None,
        jobs: None,
    })
}

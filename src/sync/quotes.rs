//! Daily and minute bar syncers.
//!
//! `daily_quotes` is incremental: each symbol resumes from its newest
//! stored bar (re-fetching that day to absorb late corrections) or its
//! listing date, falling back to a 7-day safety window on cold start.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::store::bars::{DailyBar, MinuteBar};
use crate::transform::clean::{clean, CleanSpec};
use crate::transform::{opt_date_col, opt_datetime_col, opt_f64_col};

use super::{run_sharded, Scope, SyncContext, SyncStats, Syncer, TargetOutcome};

/// Cold-start window, sized to absorb late upstream corrections.
const SAFETY_WINDOW_DAYS: i64 = 7;

const DAILY_CLEAN: CleanSpec = CleanSpec {
    key_cols: &["trade_date"],
    required_f64: &["open", "high", "low", "close", "volume", "amount"],
    optional_f64: &["change", "change_pct", "turnover_rate"],
    ohlc: true,
    change_pct_col: Some("change_pct"),
};

const MINUTE_CLEAN: CleanSpec = CleanSpec {
    key_cols: &["ts"],
    required_f64: &["open", "high", "low", "close", "volume", "amount"],
    optional_f64: &[],
    ohlc: true,
    change_pct_col: None,
};

pub struct DailyQuotesSyncer;

#[async_trait]
impl Syncer for DailyQuotesSyncer {
    fn name(&self) -> &'static str {
        "daily_quotes"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let today = chrono::Local::now().date_naive();

        // Scope resolution: cursors carry list_date and resume point.
        let cursors = ctx.store.quote_cursors().await?;
        let cursor_map: HashMap<String, (Option<NaiveDate>, Option<NaiveDate>)> = cursors
            .iter()
            .map(|c| (c.code.clone(), (c.list_date, c.last_trade_date)))
            .collect();

        let (codes, fixed_range): (Vec<String>, Option<(NaiveDate, NaiveDate)>) = match scope {
            Scope::Auto => (cursors.into_iter().map(|c| c.code).collect(), None),
            Scope::Codes(codes) => (codes, None),
            Scope::Date(d) => (
                cursors.into_iter().map(|c| c.code).collect(),
                Some((d, d)),
            ),
        };

        let ctx2 = ctx.clone();
        run_sharded(&ctx, cancel, self.name(), codes, |code| {
            let ctx = ctx2.clone();
            let cursor = cursor_map.get(&code).copied();
            async move {
                let (start, end) = match fixed_range {
                    Some(range) => range,
                    None => {
                        let (list_date, last) = cursor.unwrap_or((None, None));
                        let start = resume_date(list_date, last, today);
                        (start, today)
                    }
                };
                if start > end {
                    return Ok(TargetOutcome {
                        fetched: 0,
                        accepted: 0,
                        written: 0,
                    });
                }

                let frame = match ctx.feed.daily_bars(&code, start, end).await {
                    Ok(df) => df,
                    Err(SyncError::Empty) => {
                        return Ok(TargetOutcome {
                            fetched: 0,
                            accepted: 0,
                            written: 0,
                        })
                    }
                    Err(e) => return Err(e),
                };
                let fetched = frame.height();

                let (df, report) = clean(frame, &DAILY_CLEAN)?;
                report.check_excessive()?;

                let rows = daily_rows_from_frame(&code, &df)?;
                let outcome = ctx.store.upsert_daily_bars(&rows).await?;
                Ok(TargetOutcome {
                    fetched,
                    accepted: report.accepted,
                    written: outcome.written,
                })
            }
        })
        .await
    }
}

/// Incremental start date: resume from the stored cursor (re-fetching the
/// newest stored day), never before the listing date, defaulting to the
/// safety window on cold start.
fn resume_date(
    list_date: Option<NaiveDate>,
    last_stored: Option<NaiveDate>,
    today: NaiveDate,
) -> NaiveDate {
    let fallback = today - chrono::Duration::days(SAFETY_WINDOW_DAYS);
    let base = last_stored.unwrap_or(fallback);
    match list_date {
        Some(listed) => base.max(listed),
        None => base,
    }
}

pub(crate) fn daily_rows_from_frame(code: &str, df: &DataFrame) -> SyncResult<Vec<DailyBar>> {
    let dates = opt_date_col(df, "trade_date")?;
    let opens = opt_f64_col(df, "open")?;
    let highs = opt_f64_col(df, "high")?;
    let lows = opt_f64_col(df, "low")?;
    let closes = opt_f64_col(df, "close")?;
    let volumes = opt_f64_col(df, "volume")?;
    let amounts = opt_f64_col(df, "amount")?;
    let changes = opt_f64_col(df, "change")?;
    let change_pcts = opt_f64_col(df, "change_pct")?;
    let turnovers = opt_f64_col(df, "turnover_rate")?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(trade_date), Some(open), Some(high), Some(low), Some(close)) =
            (dates[i], opens[i], highs[i], lows[i], closes[i])
        else {
            continue;
        };
        rows.push(DailyBar {
            code: code.to_string(),
            trade_date,
            open,
            high,
            low,
            close,
            volume: volumes[i].unwrap_or(0.0) as i64,
            amount: amounts[i].unwrap_or(0.0),
            change: changes[i],
            change_pct: change_pcts[i],
            turnover_rate: turnovers[i],
        });
    }
    Ok(rows)
}

/// Minute bars poll the watchlist only; nothing else retains 1-minute data.
pub struct MinuteBarsSyncer;

#[async_trait]
impl Syncer for MinuteBarsSyncer {
    fn name(&self) -> &'static str {
        "minute_bars"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let codes = match scope {
            Scope::Codes(codes) => codes,
            _ => ctx.store.watchlist_codes().await?,
        };
        if codes.is_empty() {
            return Ok(SyncStats::default());
        }

        let ctx2 = ctx.clone();
        run_sharded(&ctx, cancel, self.name(), codes, |code| {
            let ctx = ctx2.clone();
            async move {
                let frame = match ctx.feed.minute_bars(&code).await {
                    Ok(df) => df,
                    Err(SyncError::Empty) => {
                        return Ok(TargetOutcome {
                            fetched: 0,
                            accepted: 0,
                            written: 0,
                        })
                    }
                    Err(e) => return Err(e),
                };
                let fetched = frame.height();

                let (df, report) = clean(frame, &MINUTE_CLEAN)?;
                report.check_excessive()?;

                let rows = minute_rows_from_frame(&code, &df)?;
                let outcome = ctx.store.upsert_minute_bars(&rows).await?;
                Ok(TargetOutcome {
                    fetched,
                    accepted: report.accepted,
                    written: outcome.written,
                })
            }
        })
        .await
    }
}

fn minute_rows_from_frame(code: &str, df: &DataFrame) -> SyncResult<Vec<MinuteBar>> {
    let stamps = opt_datetime_col(df, "ts")?;
    let opens = opt_f64_col(df, "open")?;
    let highs = opt_f64_col(df, "high")?;
    let lows = opt_f64_col(df, "low")?;
    let closes = opt_f64_col(df, "close")?;
    let volumes = opt_f64_col(df, "volume")?;
    let amounts = opt_f64_col(df, "amount")?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(ts), Some(open), Some(high), Some(low), Some(close)) =
            (stamps[i], opens[i], highs[i], lows[i], closes[i])
        else {
            continue;
        };
        rows.push(MinuteBar {
            code: code.to_string(),
            ts,
            open,
            high,
            low,
            close,
            volume: volumes[i].unwrap_or(0.0) as i64,
            amount: amounts[i].unwrap_or(0.0),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn resume_uses_stored_cursor() {
        let today = d(2024, 1, 19);
        // Stored data resumes from the stored date itself (late corrections).
        assert_eq!(
            resume_date(Some(d(2010, 1, 4)), Some(d(2024, 1, 17)), today),
            d(2024, 1, 17)
        );
    }

    #[test]
    fn resume_cold_start_uses_safety_window() {
        let today = d(2024, 1, 19);
        assert_eq!(resume_date(None, None, today), d(2024, 1, 12));
        // Listing date wins over the window for fresh IPOs.
        assert_eq!(
            resume_date(Some(d(2024, 1, 16)), None, today),
            d(2024, 1, 16)
        );
    }

    #[test]
    fn daily_rows_decode_from_kline_strings() {
        // Adapter klines arrive as strings; the cleaner casts, the decoder
        // reads the typed frame.
        let raw = df! {
            "trade_date" => &["2024-01-15", "2024-01-16"],
            "open" => &["10.00", "10.20"],
            "close" => &["10.20", "10.40"],
            "high" => &["10.50", "10.60"],
            "low" => &["9.80", "10.10"],
            "volume" => &["123456", "111111"],
            "amount" => &["1234567.0", "1111111.0"],
            "change_pct" => &["2.0", "1.96"],
            "change" => &["0.20", "0.20"],
            "turnover_rate" => &["1.2", "1.1"],
        }
        .unwrap();
        let (df, report) = clean(raw, &DAILY_CLEAN).unwrap();
        assert_eq!(report.accepted, 2);

        let rows = daily_rows_from_frame("000001", &df).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trade_date, d(2024, 1, 15));
        assert_eq!(rows[0].volume, 123_456);
        assert_eq!(rows[1].close, 10.40);
    }
}

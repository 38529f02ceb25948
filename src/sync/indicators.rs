//! Technical indicator engine.
//!
//! Derived strictly from stored daily bars: MA{5,10,20,60}, the MACD
//! triplet, RSI14, KDJ, BOLL, CCI, ATR and OBV. Bulk series come from
//! `rust_ti`; shorter-than-window prefixes are NaN-padded and land as NULL.
//!
//! Staleness is tracked per code: a symbol whose bars were rewritten after
//! its newest indicator write gets its lookback window recomputed. The
//! `INDICATOR_RECOMPUTE_ALL` flag widens recomputation to the symbol's full
//! stored history for historical corrections.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_ti::standard_indicators::bulk as sti;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::config::INDICATOR_LOOKBACK;
use crate::error::SyncResult;
use crate::store::bars::DailyBar;
use crate::store::indicators::TechIndicator;

use super::{run_sharded, Scope, SyncContext, SyncStats, Syncer, TargetOutcome};

const KDJ_WINDOW: usize = 9;
const KDJ_SMOOTH: usize = 3;
const BOLL_WINDOW: usize = 20;
const RSI_WINDOW: usize = 14;
const ATR_WINDOW: usize = 14;
const CCI_WINDOW: usize = 14;
const MACD_MIN_LEN: usize = 34;

/// Calendar horizon that comfortably covers the lookback window plus the
/// MACD warm-up in trading days.
const FETCH_HORIZON_DAYS: i64 = 240;

pub struct TechIndicatorsSyncer;

#[async_trait]
impl Syncer for TechIndicatorsSyncer {
    fn name(&self) -> &'static str {
        "tech_indicators"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let today = chrono::Local::now().date_naive();
        let codes = match scope {
            Scope::Codes(codes) => codes,
            _ => ctx.store.codes_with_stale_indicators().await?,
        };
        if codes.is_empty() {
            return Ok(SyncStats::default());
        }

        let recompute_all = ctx.settings.indicator_recompute_all;
        let ctx2 = ctx.clone();
        run_sharded(&ctx, cancel, self.name(), codes, |code| {
            let ctx = ctx2.clone();
            async move {
                let start = if recompute_all {
                    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()
                } else {
                    today - chrono::Duration::days(FETCH_HORIZON_DAYS)
                };
                let bars = ctx.store.daily_bars(&code, start, today).await?;
                if bars.is_empty() {
                    return Ok(TargetOutcome {
                        fetched: 0,
                        accepted: 0,
                        written: 0,
                    });
                }

                let mut rows = compute_indicators(&bars);
                if !recompute_all && rows.len() > INDICATOR_LOOKBACK {
                    // Leading bars only warm up the series; write the window.
                    rows.drain(..rows.len() - INDICATOR_LOOKBACK);
                }
                let accepted = rows.len();
                let outcome = ctx.store.upsert_tech_indicators(&rows).await?;
                Ok(TargetOutcome {
                    fetched: bars.len(),
                    accepted,
                    written: outcome.written,
                })
            }
        })
        .await
    }
}

/// NaN-prefix a bulk series back to the input length.
fn pad_series(values: &[f64], n: usize) -> Vec<f64> {
    let pad = n.saturating_sub(values.len());
    let mut out = vec![f64::NAN; pad];
    out.extend_from_slice(values);
    out
}

fn opt(v: f64) -> Option<f64> {
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

/// Compute the full indicator set over a bar series, one output row per bar.
pub(crate) fn compute_indicators(bars: &[DailyBar]) -> Vec<TechIndicator> {
    let n = bars.len();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();
    let typical: Vec<f64> = bars
        .iter()
        .map(|b| (b.high + b.low + b.close) / 3.0)
        .collect();

    let ma = |period: usize| -> Vec<f64> {
        if n < period {
            vec![f64::NAN; n]
        } else {
            pad_series(&sti::simple_moving_average(&closes, period), n)
        }
    };
    let ma5 = ma(5);
    let ma10 = ma(10);
    let ma20 = ma(20);
    let ma60 = ma(60);

    let (macd_dif, macd_dea, macd_hist) = if n < MACD_MIN_LEN {
        (vec![f64::NAN; n], vec![f64::NAN; n], vec![f64::NAN; n])
    } else {
        let triples = sti::macd(&closes);
        (
            pad_series(&triples.iter().map(|t| t.0).collect::<Vec<_>>(), n),
            pad_series(&triples.iter().map(|t| t.1).collect::<Vec<_>>(), n),
            pad_series(&triples.iter().map(|t| t.2).collect::<Vec<_>>(), n),
        )
    };

    let rsi14 = if n < RSI_WINDOW {
        vec![f64::NAN; n]
    } else {
        pad_series(&sti::rsi(&closes), n)
    };

    let (kdj_k, kdj_d, kdj_j) = kdj(&closes, n);

    let (boll_lower, boll_mid, boll_upper) = if n < BOLL_WINDOW {
        (vec![f64::NAN; n], vec![f64::NAN; n], vec![f64::NAN; n])
    } else {
        let bands = rust_ti::candle_indicators::bulk::moving_constant_bands(
            &closes,
            rust_ti::ConstantModelType::SimpleMovingAverage,
            rust_ti::DeviationModel::StandardDeviation,
            2.0,
            BOLL_WINDOW,
        );
        (
            pad_series(&bands.iter().map(|t| t.0).collect::<Vec<_>>(), n),
            pad_series(&bands.iter().map(|t| t.1).collect::<Vec<_>>(), n),
            pad_series(&bands.iter().map(|t| t.2).collect::<Vec<_>>(), n),
        )
    };

    let cci14 = if n < CCI_WINDOW {
        vec![f64::NAN; n]
    } else {
        pad_series(
            &rust_ti::momentum_indicators::bulk::commodity_channel_index(
                &typical,
                rust_ti::ConstantModelType::SimpleMovingAverage,
                rust_ti::DeviationModel::MeanAbsoluteDeviation,
                0.015,
                CCI_WINDOW,
            ),
            n,
        )
    };

    let atr14 = if n < ATR_WINDOW {
        vec![f64::NAN; n]
    } else {
        let values: Vec<f64> = (0..=n - ATR_WINDOW)
            .map(|i| {
                let end = i + ATR_WINDOW;
                rust_ti::other_indicators::single::average_true_range(
                    &closes[i..end],
                    &highs[i..end],
                    &lows[i..end],
                    rust_ti::ConstantModelType::SimpleMovingAverage,
                )
            })
            .collect();
        pad_series(&values, n)
    };

    let obv = if n < 2 {
        vec![f64::NAN; n]
    } else {
        pad_series(
            &rust_ti::momentum_indicators::bulk::on_balance_volume(&closes, &volumes, 0.0),
            n,
        )
    };

    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let mut row = TechIndicator::new(&bar.code, bar.trade_date);
            row.ma5 = opt(ma5[i]);
            row.ma10 = opt(ma10[i]);
            row.ma20 = opt(ma20[i]);
            row.ma60 = opt(ma60[i]);
            row.macd_dif = opt(macd_dif[i]);
            row.macd_dea = opt(macd_dea[i]);
            row.macd_hist = opt(macd_hist[i]);
            row.rsi14 = opt(rsi14[i]);
            row.kdj_k = opt(kdj_k[i]);
            row.kdj_d = opt(kdj_d[i]);
            row.kdj_j = opt(kdj_j[i]);
            row.boll_upper = opt(boll_upper[i]);
            row.boll_mid = opt(boll_mid[i]);
            row.boll_lower = opt(boll_lower[i]);
            row.cci14 = opt(cci14[i]);
            row.atr14 = opt(atr14[i]);
            row.obv = opt(obv[i]);
            row
        })
        .collect()
}

/// KDJ: raw %K over a 9-bar stochastic window, smoothed twice with 3-bar
/// moving averages, J = 3K − 2D.
fn kdj(closes: &[f64], n: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if n < KDJ_WINDOW + 2 * (KDJ_SMOOTH - 1) {
        return (vec![f64::NAN; n], vec![f64::NAN; n], vec![f64::NAN; n]);
    }
    let raw: Vec<f64> = closes
        .windows(KDJ_WINDOW)
        .map(|w| rust_ti::momentum_indicators::single::stochastic_oscillator(w))
        .collect();
    let k = sti::simple_moving_average(&raw, KDJ_SMOOTH);
    let d = sti::simple_moving_average(&k, KDJ_SMOOTH);

    let k_padded = pad_series(&k, n);
    let d_padded = pad_series(&d, n);
    let j: Vec<f64> = k_padded
        .iter()
        .zip(d_padded.iter())
        .map(|(&k_v, &d_v)| {
            if k_v.is_nan() || d_v.is_nan() {
                f64::NAN
            } else {
                3.0 * k_v - 2.0 * d_v
            }
        })
        .collect();
    (k_padded, d_padded, j)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar_series(closes: &[f64]) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| DailyBar {
                code: "600519".to_string(),
                trade_date: start + chrono::Duration::days(i as i64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000_000 + (i as i64) * 1_000,
                amount: close * 1.0e6,
                change: None,
                change_pct: Some(0.5),
                turnover_rate: None,
            })
            .collect()
    }

    #[test]
    fn short_series_yields_null_indicators() {
        let bars = bar_series(&[10.0, 10.1, 10.2]);
        let rows = compute_indicators(&bars);
        assert_eq!(rows.len(), 3);
        assert!(rows[2].ma5.is_none());
        assert!(rows[2].macd_hist.is_none());
        assert!(rows[2].boll_mid.is_none());
    }

    #[test]
    fn ma5_matches_hand_computation() {
        let closes: Vec<f64> = (1..=10).map(f64::from).collect();
        let rows = compute_indicators(&bar_series(&closes));

        // First 4 rows cannot have MA5.
        assert!(rows[3].ma5.is_none());
        // MA5 at index 4 = mean(1..=5) = 3.0.
        assert!((rows[4].ma5.unwrap() - 3.0).abs() < 1e-9);
        // MA5 at the end = mean(6..=10) = 8.0.
        assert!((rows[9].ma5.unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn long_series_fills_all_indicators() {
        // 80 bars with mild oscillation: everything incl. MA60 and MACD
        // should be present at the tail.
        let closes: Vec<f64> = (0..80)
            .map(|i| 100.0 + f64::from(i % 7) - f64::from(i % 3))
            .collect();
        let rows = compute_indicators(&bar_series(&closes));
        let last = rows.last().unwrap();
        assert!(last.ma5.is_some());
        assert!(last.ma60.is_some());
        assert!(last.macd_dif.is_some());
        assert!(last.rsi14.is_some());
        assert!(last.kdj_k.is_some());
        assert!(last.kdj_j.is_some());
        assert!(last.boll_upper.is_some());
        assert!(last.cci14.is_some());
        assert!(last.atr14.is_some());
        assert!(last.obv.is_some());
    }

    #[test]
    fn bollinger_bands_bracket_the_mid() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 50.0 + f64::from(i % 5))
            .collect();
        let rows = compute_indicators(&bar_series(&closes));
        let last = rows.last().unwrap();
        let (lower, mid, upper) = (
            last.boll_lower.unwrap(),
            last.boll_mid.unwrap(),
            last.boll_upper.unwrap(),
        );
        assert!(lower < mid && mid < upper);
    }

    #[test]
    fn kdj_j_follows_identity() {
        let closes: Vec<f64> = (0..30).map(|i| 10.0 + f64::from(i % 4)).collect();
        let rows = compute_indicators(&bar_series(&closes));
        let last = rows.last().unwrap();
        let (k, d, j) = (
            last.kdj_k.unwrap(),
            last.kdj_d.unwrap(),
            last.kdj_j.unwrap(),
        );
        assert!((j - (3.0 * k - 2.0 * d)).abs() < 1e-9);
    }
}

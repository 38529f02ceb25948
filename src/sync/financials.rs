//! Quarterly report syncer — weekly full rescan over all active symbols.

use std::sync::Arc;

use polars::prelude::DataFrame;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::store::financials::Financial;
use crate::transform::{opt_date_col, opt_f64_col};

use super::{run_sharded, Scope, SyncContext, SyncStats, Syncer, TargetOutcome};

pub struct FinancialsSyncer;

#[async_trait]
impl Syncer for FinancialsSyncer {
    fn name(&self) -> &'static str {
        "financial_statements"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let codes = match scope {
            Scope::Codes(codes) => codes,
            _ => ctx.store.active_codes().await?,
        };

        let ctx2 = ctx.clone();
        run_sharded(&ctx, cancel, self.name(), codes, |code| {
            let ctx = ctx2.clone();
            async move {
                let frame = match ctx.feed.financials(&code).await {
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

                let rows = rows_from_frame(&code, &frame)?;
                let accepted = rows.len();
                let outcome = ctx.store.upsert_financials(&rows).await?;
                Ok(TargetOutcome {
                    fetched,
                    accepted,
                    written: outcome.written,
                })
            }
        })
        .await
    }
}

/// Decode report rows, dropping anything violating `pub_date ≥ end_date` —
/// a report announced before its own period end is upstream garbage.
fn rows_from_frame(code: &str, df: &DataFrame) -> SyncResult<Vec<Financial>> {
    let end_dates = opt_date_col(df, "end_date")?;
    let pub_dates = opt_date_col(df, "pub_date")?;
    let revenues = opt_f64_col(df, "revenue")?;
    let net_profits = opt_f64_col(df, "net_profit")?;
    let epss = opt_f64_col(df, "eps")?;
    let roes = opt_f64_col(df, "roe")?;
    let gross_margins = opt_f64_col(df, "gross_margin")?;
    let debt_ratios = opt_f64_col(df, "debt_ratio")?;
    let ocfs = opt_f64_col(df, "ocf_per_share")?;

    let mut rows = Vec::with_capacity(df.height());
    let mut dropped = 0usize;
    for i in 0..df.height() {
        let (Some(end_date), Some(pub_date)) = (end_dates[i], pub_dates[i]) else {
            dropped += 1;
            continue;
        };
        if pub_date < end_date {
            dropped += 1;
            continue;
        }
        rows.push(Financial {
            code: code.to_string(),
            end_date,
            pub_date,
            revenue: revenues[i],
            net_profit: net_profits[i],
            eps: epss[i],
            roe: roes[i],
            gross_margin: gross_margins[i],
            debt_ratio: debt_ratios[i],
            ocf_per_share: ocfs[i],
        });
    }
    if dropped > 0 {
        tracing::debug!(code, dropped, "financial rows rejected");
    }
    Ok(rows)
}

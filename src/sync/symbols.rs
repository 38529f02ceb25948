//! Symbol master sync: full listing pull, secondary enrichment merge, and
//! soft-deactivation of delisted codes.

use std::sync::Arc;

use polars::prelude::*;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::config::EnrichPrefer;
use crate::error::{SyncError, SyncResult};
use crate::store::symbols::Symbol;
use crate::transform::clean::{clean, CleanSpec};
use crate::transform::{opt_date_col, opt_str_col, require_cols};

use super::{check_cancelled, Scope, SyncContext, SyncStats, Syncer};

const CLEAN: CleanSpec = CleanSpec {
    key_cols: &["code"],
    required_f64: &[],
    optional_f64: &[],
    ohlc: false,
    change_pct_col: None,
};

pub struct SymbolListSyncer;

#[async_trait]
impl Syncer for SymbolListSyncer {
    fn name(&self) -> &'static str {
        "symbol_list"
    }

    async fn run(
        &self,
        ctx: Arc<SyncContext>,
        _scope: Scope,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncStats> {
        let listing = ctx.feed.symbol_list().await?;
        require_cols(&listing, &["code", "name", "market", "asset_type"])?;
        let fetched = listing.height();

        check_cancelled(cancel)?;

        // Secondary enrichment is best-effort: a missing industry feed must
        // not block the listing itself, but the failure stays visible.
        let enrichment = match ctx.feed.symbol_industry().await {
            Ok(df) => Some(df),
            Err(SyncError::Empty) => None,
            Err(e) => {
                tracing::warn!("symbol enrichment fetch failed: {e}");
                ctx.store
                    .record_sync_error(self.name(), Some("enrichment"), &e)
                    .await?;
                None
            }
        };
        if enrichment.is_some() {
            ctx.store
                .resolve_sync_error(self.name(), Some("enrichment"))
                .await?;
        }

        let merged = match enrichment {
            Some(extra) => merge_enrichment(listing, extra, ctx.settings.enrich_prefer)?,
            None => listing,
        };

        let (df, report) = clean(merged, &CLEAN)?;
        report.check_excessive()?;

        let rows = rows_from_frame(&df)?;
        let outcome = ctx.store.upsert_symbols(&rows).await?;

        let present: Vec<String> = rows.iter().map(|s| s.code.clone()).collect();
        let deactivated = ctx.store.reconcile_active_symbols(&present).await?;
        if deactivated > 0 {
            tracing::info!(deactivated, "symbols dropped from upstream listing");
        }

        Ok(SyncStats {
            fetched,
            accepted: report.accepted,
            written: outcome.written,
            errors: 0,
        })
    }
}

/// Left-join the industry/list-date frame onto the listing. Precedence is a
/// configuration decision: the preferred source wins wherever it is
/// non-null, the other fills the gaps.
fn merge_enrichment(
    listing: DataFrame,
    enrichment: DataFrame,
    prefer: EnrichPrefer,
) -> SyncResult<DataFrame> {
    require_cols(&enrichment, &["code", "industry", "list_date"])?;

    // The listing has no industry/list_date of its own today, but the
    // upstream occasionally grows columns; coalesce keeps that future safe.
    let has_primary_industry = listing.schema().contains("industry");
    let joined = listing
        .lazy()
        .join(
            enrichment
                .lazy()
                .rename(
                    ["industry", "list_date"],
                    ["industry_ext", "list_date_ext"],
                    true,
                ),
            [col("code")],
            [col("code")],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let (industry_expr, list_date_expr) = if has_primary_industry {
        match prefer {
            EnrichPrefer::Primary => (
                coalesce(&[col("industry"), col("industry_ext")]),
                coalesce(&[col("list_date"), col("list_date_ext")]),
            ),
            EnrichPrefer::Secondary => (
                coalesce(&[col("industry_ext"), col("industry")]),
                coalesce(&[col("list_date_ext"), col("list_date")]),
            ),
        }
    } else {
        (col("industry_ext"), col("list_date_ext"))
    };

    let merged = joined
        .lazy()
        .with_columns([
            industry_expr.alias("industry"),
            list_date_expr.alias("list_date"),
        ])
        .collect()?;
    Ok(merged.drop("industry_ext")?.drop("list_date_ext")?)
}

fn rows_from_frame(df: &DataFrame) -> SyncResult<Vec<Symbol>> {
    let codes = opt_str_col(df, "code")?;
    let names = opt_str_col(df, "name")?;
    let markets = opt_str_col(df, "market")?;
    let asset_types = opt_str_col(df, "asset_type")?;
    let industries = if df.schema().contains("industry") {
        opt_str_col(df, "industry")?
    } else {
        vec![None; df.height()]
    };
    let list_dates = if df.schema().contains("list_date") {
        opt_date_col(df, "list_date")?
    } else {
        vec![None; df.height()]
    };

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(code), Some(name)) = (codes[i].clone(), names[i].clone()) else {
            continue;
        };
        let market = markets[i].clone().unwrap_or_else(|| "SZ".to_string());
        let asset_type = asset_types[i].clone().unwrap_or_else(|| "stock".to_string());
        rows.push(Symbol {
            code,
            name,
            market,
            asset_type,
            industry: industries[i].clone().filter(|s| !s.is_empty() && s != "-"),
            list_date: list_dates[i],
            active: true,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> DataFrame {
        df! {
            "code" => &["000001", "600519"],
            "name" => &["平安银行", "贵州茅台"],
            "market" => &["SZ", "SH"],
            "asset_type" => &["stock", "stock"],
        }
        .unwrap()
    }

    fn enrichment() -> DataFrame {
        df! {
            "code" => &["000001"],
            "industry" => &["银行"],
            "list_date" => &["1991-04-03"],
        }
        .unwrap()
    }

    #[test]
    fn merge_fills_from_secondary() {
        let merged = merge_enrichment(listing(), enrichment(), EnrichPrefer::Secondary).unwrap();
        let rows = rows_from_frame(&merged).unwrap();
        assert_eq!(rows.len(), 2);

        let pingan = rows.iter().find(|s| s.code == "000001").unwrap();
        assert_eq!(pingan.industry.as_deref(), Some("银行"));
        assert_eq!(
            pingan.list_date,
            chrono::NaiveDate::from_ymd_opt(1991, 4, 3)
        );

        // No enrichment row for 600519 — left join keeps it with nulls.
        let moutai = rows.iter().find(|s| s.code == "600519").unwrap();
        assert_eq!(moutai.industry, None);
    }

    #[test]
    fn merge_is_deterministic_for_fixed_precedence() {
        let a = merge_enrichment(listing(), enrichment(), EnrichPrefer::Secondary).unwrap();
        let b = merge_enrichment(listing(), enrichment(), EnrichPrefer::Secondary).unwrap();
        assert_eq!(
            rows_from_frame(&a).unwrap(),
            rows_from_frame(&b).unwrap()
        );
    }
}

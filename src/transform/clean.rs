//! Domain cleaning rules, applied in a fixed order over a columnar batch.
//!
//! The pipeline never coerces: a value that fails to parse drops its row.
//! Counters are kept per rule so observability can tell a dirty batch from
//! an upstream schema change.

use polars::prelude::*;

use crate::error::{SyncError, SyncResult};

/// What to enforce for a given dataset.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanSpec {
    /// Composite primary key; rows with a null component are dropped.
    pub key_cols: &'static [&'static str],
    /// Columns cast to Float64; a row whose cast fails is dropped.
    pub required_f64: &'static [&'static str],
    /// Columns cast to Float64 where null is acceptable.
    pub optional_f64: &'static [&'static str],
    /// Apply OHLC sanity (rule 2) using open/high/low/close columns.
    pub ohlc: bool,
    /// Column checked against the ±30% A-share daily limit (rule 3).
    pub change_pct_col: Option<&'static str>,
}

/// Per-batch acceptance counters, one per cleaning stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub accepted: usize,
    pub rejected_cast: usize,
    pub rejected_null_key: usize,
    pub rejected_price: usize,
    pub rejected_limit: usize,
    pub rejected_dupe: usize,
}

impl CleanReport {
    pub fn rejected(&self) -> usize {
        self.rejected_cast
            + self.rejected_null_key
            + self.rejected_price
            + self.rejected_limit
            + self.rejected_dupe
    }

    pub fn total(&self) -> usize {
        self.accepted + self.rejected()
    }

    /// A batch where more than half the rows were rejected almost certainly
    /// means the upstream payload changed shape, not that the market did.
    /// Tiny batches are exempt: one bad row out of two is dirty data, not
    /// drift.
    pub fn check_excessive(&self) -> SyncResult<()> {
        const MIN_BATCH: usize = 10;
        if self.total() >= MIN_BATCH && self.rejected() * 2 > self.total() {
            return Err(SyncError::SchemaDrift(format!(
                "{} of {} rows rejected",
                self.rejected(),
                self.total()
            )));
        }
        Ok(())
    }
}

/// Run the full pipeline: strict typecast, then the four cleaning rules.
/// Returns the surviving frame plus per-rule counters.
pub fn clean(df: DataFrame, spec: &CleanSpec) -> SyncResult<(DataFrame, CleanReport)> {
    let mut report = CleanReport::default();
    let mut df = df;

    // Typecast with rejection: unparseable values become null, and a null
    // in a required column drops the row.
    let cast_exprs: Vec<Expr> = spec
        .required_f64
        .iter()
        .chain(spec.optional_f64.iter())
        .map(|c| col(*c).cast(DataType::Float64).alias(*c))
        .collect();
    if !cast_exprs.is_empty() {
        df = df.lazy().with_columns(cast_exprs).collect()?;
    }
    if !spec.required_f64.is_empty() {
        let before = df.height();
        let keep = all_non_null(spec.required_f64);
        df = df.lazy().filter(keep).collect()?;
        report.rejected_cast = before - df.height();
    }

    // Rule 1: null primary-key components.
    if !spec.key_cols.is_empty() {
        let before = df.height();
        df = df.lazy().filter(all_non_null(spec.key_cols)).collect()?;
        report.rejected_null_key = before - df.height();
    }

    // Rule 2: OHLC sanity — inverted ranges and non-positive prices.
    if spec.ohlc {
        let before = df.height();
        let positive = col("open")
            .gt(lit(0.0))
            .and(col("close").gt(lit(0.0)))
            .and(col("high").gt(lit(0.0)))
            .and(col("low").gt(lit(0.0)));
        let ordered = col("high").gt_eq(col("low"));
        df = df.lazy().filter(positive.and(ordered)).collect()?;
        report.rejected_price = before - df.height();
    }

    // Rule 3: the ±30% daily limit. Null pct passes (upstream omits it for
    // new listings).
    if let Some(pct) = spec.change_pct_col {
        let before = df.height();
        let within = col(pct).abs().lt_eq(lit(30.0)).or(col(pct).is_null());
        df = df.lazy().filter(within).collect()?;
        report.rejected_limit = before - df.height();
    }

    // Rule 4: dedup on the primary key, keeping the last occurrence.
    if !spec.key_cols.is_empty() {
        let before = df.height();
        let keys: Vec<String> = spec.key_cols.iter().map(|s| (*s).to_string()).collect();
        df = df.unique_stable(Some(&keys), UniqueKeepStrategy::Last, None)?;
        report.rejected_dupe = before - df.height();
    }

    report.accepted = df.height();
    tracing::debug!(
        accepted = report.accepted,
        cast = report.rejected_cast,
        null_key = report.rejected_null_key,
        price = report.rejected_price,
        limit = report.rejected_limit,
        dupe = report.rejected_dupe,
        "batch cleaned"
    );
    Ok((df, report))
}

fn all_non_null(cols: &[&str]) -> Expr {
    cols.iter()
        .map(|c| col(*c).is_not_null())
        .reduce(Expr::and)
        .unwrap_or_else(|| lit(true))
}

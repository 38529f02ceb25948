//! Columnar transform layer: typed column access and the cleaning pipeline.
//!
//! All upstream payloads travel as Polars frames until the repository seam;
//! row-at-a-time validation never leaks into syncers.

pub mod clean;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::{SyncError, SyncResult};

/// Days between CE day 1 and the Unix epoch; Polars dates count from epoch.
const EPOCH_CE_DAYS: i32 = 719_163;

/// Fail with `SchemaDrift` unless every named column is present.
pub fn require_cols(df: &DataFrame, cols: &[&str]) -> SyncResult<()> {
    let schema = df.schema();
    for c in cols {
        if !schema.contains(c) {
            return Err(SyncError::SchemaDrift(format!("missing column {c}")));
        }
    }
    Ok(())
}

/// Extract a column as `f64`, nulls mapped to NaN.
pub fn f64_col(df: &DataFrame, name: &str) -> SyncResult<Vec<f64>> {
    let col = df
        .column(name)
        .map_err(|_| SyncError::SchemaDrift(format!("missing column {name}")))?;
    let ca = col.cast(&DataType::Float64)?;
    Ok(ca
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Extract a column as optional `f64`.
pub fn opt_f64_col(df: &DataFrame, name: &str) -> SyncResult<Vec<Option<f64>>> {
    let col = df
        .column(name)
        .map_err(|_| SyncError::SchemaDrift(format!("missing column {name}")))?;
    let ca = col.cast(&DataType::Float64)?;
    Ok(ca.f64()?.into_iter().collect())
}

/// Extract a column as optional `i64`.
pub fn opt_i64_col(df: &DataFrame, name: &str) -> SyncResult<Vec<Option<i64>>> {
    let col = df
        .column(name)
        .map_err(|_| SyncError::SchemaDrift(format!("missing column {name}")))?;
    let ca = col.cast(&DataType::Int64)?;
    Ok(ca.i64()?.into_iter().collect())
}

/// Extract a column as optional strings.
pub fn opt_str_col(df: &DataFrame, name: &str) -> SyncResult<Vec<Option<String>>> {
    let col = df
        .column(name)
        .map_err(|_| SyncError::SchemaDrift(format!("missing column {name}")))?;
    let ca = col.cast(&DataType::String)?;
    Ok(ca
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Extract a column as optional dates. Accepts Date columns and
/// `YYYY-MM-DD` strings.
pub fn opt_date_col(df: &DataFrame, name: &str) -> SyncResult<Vec<Option<NaiveDate>>> {
    let col = df
        .column(name)
        .map_err(|_| SyncError::SchemaDrift(format!("missing column {name}")))?;
    match col.dtype() {
        DataType::Date => {
            // Physical representation of Date is days since the Unix epoch.
            let ca = col.cast(&DataType::Int32)?;
            Ok(ca
                .i32()?
                .into_iter()
                .map(|v| {
                    v.and_then(|days| NaiveDate::from_num_days_from_ce_opt(days + EPOCH_CE_DAYS))
                })
                .collect())
        }
        _ => {
            let ca = col.cast(&DataType::String)?;
            Ok(ca
                .str()?
                .into_iter()
                .map(|v| v.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()))
                .collect())
        }
    }
}

/// Extract a column as optional naive datetimes. Accepts Datetime columns,
/// epoch-second integers, and `YYYY-MM-DD HH:MM:SS` strings.
pub fn opt_datetime_col(df: &DataFrame, name: &str) -> SyncResult<Vec<Option<NaiveDateTime>>> {
    let col = df
        .column(name)
        .map_err(|_| SyncError::SchemaDrift(format!("missing column {name}")))?;
    match col.dtype() {
        DataType::Datetime(_, _) => {
            let ca = col
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
                .cast(&DataType::Int64)?;
            Ok(ca
                .i64()?
                .into_iter()
                .map(|v| {
                    v.and_then(DateTime::from_timestamp_micros)
                        .map(|dt| dt.naive_utc())
                })
                .collect())
        }
        dt if dt.is_integer() => {
            let ca = col.cast(&DataType::Int64)?;
            Ok(ca
                .i64()?
                .into_iter()
                .map(|v| {
                    v.and_then(|secs| DateTime::from_timestamp(secs, 0))
                        .map(|dt| dt.naive_utc())
                })
                .collect())
        }
        _ => {
            let ca = col.cast(&DataType::String)?;
            Ok(ca
                .str()?
                .into_iter()
                .map(|v| {
                    v.and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
                })
                .collect())
        }
    }
}

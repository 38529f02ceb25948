//! Relational store and repositories.
//!
//! One WAL-mode SQLite connection behind a fair async mutex; writes for the
//! same primary key serialize here, which is the engine's only ordering
//! guarantee within a dataset. Per-entity repositories live in sibling
//! modules as `impl Store` blocks so call sites read
//! `store.upsert_daily_bars(...)`.

pub mod bars;
pub mod errors;
pub mod financials;
pub mod indicators;
pub mod market;
pub mod news;
pub mod schema;
pub mod status;
pub mod symbols;

use std::path::Path;

use rusqlite::{params_from_iter, Connection};
use tokio::sync::Mutex;

use crate::error::{SyncError, SyncResult};

/// Bind-parameter ceiling the chunker must never exceed. The engine's hard
/// limit is 32 767; staying under 32 000 leaves headroom for statement-level
/// extras.
pub const BIND_PARAM_CEILING: usize = 32_000;

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;
";

pub struct Store {
    conn: Mutex<Connection>,
}

/// Result of a chunked write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub written: usize,
    pub chunks: usize,
}

impl Store {
    pub fn open(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and ad-hoc runs.
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure against the connection. Repositories use this for
    /// everything; holding the guard across an await point is impossible by
    /// construction since the closure is synchronous.
    pub(crate) async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> SyncResult<T>,
    ) -> SyncResult<T> {
        let mut conn = self.conn.lock().await;
        f(&mut conn)
    }
}

/// Multi-row statement spec for [`bulk_write`].
pub(crate) struct BulkSpec {
    /// `INSERT INTO t (a, b, c)` or `INSERT OR IGNORE INTO t (a, b, c)`.
    pub insert_sql: &'static str,
    /// Parameters per row; must match the column list above.
    pub row_params: usize,
    /// Trailing conflict clause, e.g. `ON CONFLICT(a) DO UPDATE SET ...`.
    pub conflict_sql: &'static str,
}

/// Write rows in chunks sized so `rows × params ≤` [`BIND_PARAM_CEILING`].
///
/// Each chunk commits in its own transaction: a failing chunk does not roll
/// back earlier ones, and the error carries the failed chunk index so the
/// caller can report partial progress.
pub(crate) fn bulk_write(
    conn: &mut Connection,
    spec: &BulkSpec,
    rows: Vec<Vec<rusqlite::types::Value>>,
    configured_chunk_rows: usize,
) -> SyncResult<WriteOutcome> {
    if rows.is_empty() {
        return Ok(WriteOutcome::default());
    }
    let per_chunk = configured_chunk_rows
        .min(BIND_PARAM_CEILING / spec.row_params)
        .max(1);

    let mut outcome = WriteOutcome::default();
    for (chunk_idx, chunk) in rows.chunks(per_chunk).enumerate() {
        let placeholders = std::iter::repeat_n(
            format!("({})", vec!["?"; spec.row_params].join(",")),
            chunk.len(),
        )
        .collect::<Vec<_>>()
        .join(",");
        let sql = format!(
            "{} VALUES {} {}",
            spec.insert_sql, placeholders, spec.conflict_sql
        );

        let flat = chunk.iter().flatten().cloned();
        let written = (|| -> rusqlite::Result<usize> {
            let tx = conn.transaction()?;
            let written = tx.execute(&sql, params_from_iter(flat))?;
            tx.commit()?;
            Ok(written)
        })()
        .map_err(|e| write_error(chunk_idx, &e))?;

        outcome.written += written;
        outcome.chunks += 1;
    }
    Ok(outcome)
}

fn write_error(chunk: usize, e: &rusqlite::Error) -> SyncError {
    match e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SyncError::WriteConflict {
                chunk,
                message: e.to_string(),
            }
        }
        _ => SyncError::Unknown(format!("chunk {chunk}: {e}")),
    }
}

/// Current wall-clock timestamp in the store's text format.
pub(crate) fn now_text() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

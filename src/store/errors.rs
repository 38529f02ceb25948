//! Sync-error bookkeeping.
//!
//! One open row per `(task_name, target_code)`: failures insert or bump it,
//! the next success for the same key closes it by setting `resolved_at`.
//! Nothing is ever lost to monitoring — this table is the contract.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension};

use super::{now_text, Store};
use crate::config::QUARANTINE_RETRIES;
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct SyncErrorRow {
    pub id: i64,
    pub task_name: String,
    pub target_code: Option<String>,
    pub error_kind: String,
    pub message: String,
    pub retry_count: i64,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl Store {
    /// Record a failure for `(task, code)`. An existing unresolved row is
    /// bumped instead of duplicated, so the table stays one-row-per-problem.
    pub async fn record_sync_error(
        &self,
        task: &str,
        code: Option<&str>,
        err: &SyncError,
    ) -> SyncResult<()> {
        let task = task.to_string();
        let code = code.map(str::to_string);
        let kind = err.kind().to_string();
        let message = err.to_string();
        self.with_conn(move |conn| {
            let bumped = conn.execute(
                "UPDATE sync_errors SET retry_count = retry_count + 1, \
                     last_retry_at = ?1, error_kind = ?2, message = ?3 \
                 WHERE task_name = ?4 AND target_code IS ?5 AND resolved_at IS NULL",
                params![now_text(), kind, message, task, code],
            )?;
            if bumped == 0 {
                conn.execute(
                    "INSERT INTO sync_errors \
                         (task_name, target_code, error_kind, message, retry_count, created_at) \
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    params![task, code, kind, message, now_text()],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Close any open row for `(task, code)` after a successful run.
    /// Returns how many rows were resolved.
    pub async fn resolve_sync_error(&self, task: &str, code: Option<&str>) -> SyncResult<usize> {
        let task = task.to_string();
        let code = code.map(str::to_string);
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE sync_errors SET resolved_at = ?1 \
                 WHERE task_name = ?2 AND target_code IS ?3 AND resolved_at IS NULL",
                params![now_text(), task, code],
            )?;
            Ok(n)
        })
        .await
    }

    pub async fn sync_errors_for_task(&self, task: &str) -> SyncResult<Vec<SyncErrorRow>> {
        let task = task.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, task_name, target_code, error_kind, message, retry_count, \
                        created_at, resolved_at \
                 FROM sync_errors WHERE task_name = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![task], row_to_error)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn open_sync_error_count(&self) -> SyncResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_errors WHERE resolved_at IS NULL",
                [],
                |r| r.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    /// Codes whose retry budget for `task` is exhausted. The doctor excludes
    /// these from automatic backfill.
    pub async fn quarantined_codes(&self, task: &str) -> SyncResult<HashSet<String>> {
        let task = task.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT target_code FROM sync_errors \
                 WHERE task_name = ?1 AND resolved_at IS NULL \
                   AND target_code IS NOT NULL AND retry_count >= ?2",
            )?;
            let rows = stmt
                .query_map(params![task, QUARANTINE_RETRIES], |r| r.get(0))?
                .collect::<Result<HashSet<String>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Newest error message for a task, resolved or not (for `sync status`).
    pub async fn last_error_message(&self, task: &str) -> SyncResult<Option<String>> {
        let task = task.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT message FROM sync_errors WHERE task_name = ?1 \
                 ORDER BY id DESC LIMIT 1",
                params![task],
                |r| r.get(0),
            )
            .optional()
            .map_err(SyncError::from)
        })
        .await
    }
}

fn row_to_error(r: &rusqlite::Row<'_>) -> rusqlite::Result<SyncErrorRow> {
    Ok(SyncErrorRow {
        id: r.get(0)?,
        task_name: r.get(1)?,
        target_code: r.get(2)?,
        error_kind: r.get(3)?,
        message: r.get(4)?,
        retry_count: r.get(5)?,
        created_at: r.get(6)?,
        resolved_at: r.get(7)?,
    })
}

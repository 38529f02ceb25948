//! Task status board and doctor report persistence.

use rusqlite::{params, OptionalExtension};

use super::{now_text, Store};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct TaskStatusRow {
    pub task_name: String,
    pub last_run_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_outcome: Option<String>,
    pub progress_pct: Option<f64>,
    pub last_error: Option<String>,
    pub next_run_at: Option<String>,
}

impl Store {
    pub async fn record_task_start(&self, task: &str) -> SyncResult<()> {
        let task = task.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_status (task_name, last_run_at, last_outcome, progress_pct) \
                 VALUES (?1, ?2, 'running', 0.0) \
                 ON CONFLICT(task_name) DO UPDATE SET \
                     last_run_at = excluded.last_run_at, \
                     last_outcome = 'running', progress_pct = 0.0, last_error = NULL",
                params![task, now_text()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn record_task_progress(&self, task: &str, pct: f64) -> SyncResult<()> {
        let task = task.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE task_status SET progress_pct = ?1 WHERE task_name = ?2",
                params![pct.clamp(0.0, 100.0), task],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn record_task_finish(
        &self,
        task: &str,
        outcome: &str,
        error: Option<&str>,
    ) -> SyncResult<()> {
        let task = task.to_string();
        let outcome = outcome.to_string();
        let error = error.map(str::to_string);
        self.with_conn(move |conn| {
            let success = outcome == "succeeded";
            conn.execute(
                "INSERT INTO task_status (task_name, last_run_at, last_outcome, progress_pct, last_error) \
                 VALUES (?1, ?2, ?3, 100.0, ?4) \
                 ON CONFLICT(task_name) DO UPDATE SET \
                     last_outcome = excluded.last_outcome, \
                     progress_pct = 100.0, last_error = excluded.last_error",
                params![task, now_text(), outcome, error],
            )?;
            if success {
                conn.execute(
                    "UPDATE task_status SET last_success_at = ?1 WHERE task_name = ?2",
                    params![now_text(), task],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn record_next_run(&self, task: &str, next_run_at: &str) -> SyncResult<()> {
        let task = task.to_string();
        let next_run_at = next_run_at.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_status (task_name, next_run_at) VALUES (?1, ?2) \
                 ON CONFLICT(task_name) DO UPDATE SET next_run_at = excluded.next_run_at",
                params![task, next_run_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn task_status(&self, task: &str) -> SyncResult<Option<TaskStatusRow>> {
        let task = task.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT task_name, last_run_at, last_success_at, last_outcome, \
                        progress_pct, last_error, next_run_at \
                 FROM task_status WHERE task_name = ?1",
                params![task],
                row_to_status,
            )
            .optional()
            .map_err(SyncError::from)
        })
        .await
    }

    pub async fn all_task_status(&self) -> SyncResult<Vec<TaskStatusRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT task_name, last_run_at, last_success_at, last_outcome, \
                        progress_pct, last_error, next_run_at \
                 FROM task_status ORDER BY task_name",
            )?;
            let rows = stmt
                .query_map([], row_to_status)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Timestamp of the task's last successful run, parsed back from the
    /// board (drives the news time-window cursor).
    pub async fn last_success_at(&self, task: &str) -> SyncResult<Option<chrono::NaiveDateTime>> {
        Ok(self
            .task_status(task)
            .await?
            .and_then(|row| row.last_success_at)
            .and_then(|s| chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()))
    }

    // -- doctor reports -----------------------------------------------------

    pub async fn insert_doctor_report(&self, report_json: &str, passed: bool) -> SyncResult<()> {
        let report_json = report_json.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO doctor_reports (generated_at, report, passed) VALUES (?1, ?2, ?3)",
                params![now_text(), report_json, i64::from(passed)],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn latest_doctor_report(&self) -> SyncResult<Option<(String, bool)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT report, passed FROM doctor_reports ORDER BY id DESC LIMIT 1",
                [],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0)),
            )
            .optional()
            .map_err(SyncError::from)
        })
        .await
    }
}

fn row_to_status(r: &rusqlite::Row<'_>) -> rusqlite::Result<TaskStatusRow> {
    Ok(TaskStatusRow {
        task_name: r.get(0)?,
        last_run_at: r.get(1)?,
        last_success_at: r.get(2)?,
        last_outcome: r.get(3)?,
        progress_pct: r.get(4)?,
        last_error: r.get(5)?,
        next_run_at: r.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        store.record_task_start("daily_quotes").await.unwrap();
        store
            .record_task_progress("daily_quotes", 40.0)
            .await
            .unwrap();

        let row = store.task_status("daily_quotes").await.unwrap().unwrap();
        assert_eq!(row.last_outcome.as_deref(), Some("running"));
        assert_eq!(row.progress_pct, Some(40.0));

        store
            .record_task_finish("daily_quotes", "succeeded", None)
            .await
            .unwrap();
        let row = store.task_status("daily_quotes").await.unwrap().unwrap();
        assert_eq!(row.last_outcome.as_deref(), Some("succeeded"));
        assert!(row.last_success_at.is_some());
        assert!(store.last_success_at("daily_quotes").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_runs_keep_last_success() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_task_finish("news", "succeeded", None)
            .await
            .unwrap();
        let success_at = store.last_success_at("news").await.unwrap();

        store
            .record_task_finish("news", "failed", Some("boom"))
            .await
            .unwrap();
        let row = store.task_status("news").await.unwrap().unwrap();
        assert_eq!(row.last_outcome.as_deref(), Some("failed"));
        assert_eq!(row.last_error.as_deref(), Some("boom"));
        assert_eq!(store.last_success_at("news").await.unwrap(), success_at);
    }

    #[tokio::test]
    async fn doctor_reports_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_doctor_report().await.unwrap().is_none());
        store
            .insert_doctor_report("{\"pass\":false}", false)
            .await
            .unwrap();
        store
            .insert_doctor_report("{\"pass\":true}", true)
            .await
            .unwrap();
        let (report, passed) = store.latest_doctor_report().await.unwrap().unwrap();
        assert!(passed);
        assert!(report.contains("true"));
    }
}

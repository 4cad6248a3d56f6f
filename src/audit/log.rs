//! Execution Audit Log: append-only execution records with query/export.
//!
//! Ported from `ExecutionLogger` in the original Python "SAM" brain, with the
//! per-stat-category SQL aggregation kept intact rather than materializing
//! every row to compute statistics in application code.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::SamResult;

use super::model::{CommandType, ExecutionRecord, ExecutionStats, ExecutionStatus};

const MAX_OUTPUT_CHARS: usize = 10_000;
const MAX_ERROR_CHARS: usize = 5_000;

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

pub struct ExecutionAuditLog {
    conn: Mutex<Connection>,
}

impl ExecutionAuditLog {
    pub fn open(db_path: &Path) -> SamResult<Self> {
        let conn = crate::db::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> SamResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> SamResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                approval_id   TEXT,
                project_id    TEXT,
                command       TEXT NOT NULL,
                command_type  TEXT NOT NULL,
                status        TEXT NOT NULL,
                output        TEXT NOT NULL DEFAULT '',
                error         TEXT NOT NULL DEFAULT '',
                exit_code     INTEGER NOT NULL DEFAULT 0,
                duration_ms   REAL NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                metadata      TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_executions_project ON executions(project_id);
            CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
            CREATE INDEX IF NOT EXISTS idx_executions_created ON executions(created_at);
            CREATE INDEX IF NOT EXISTS idx_executions_approval ON executions(approval_id);
            "#,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_execution(
        &self,
        approval_id: Option<&str>,
        command: &str,
        success: bool,
        output: &str,
        error: &str,
        exit_code: i32,
        duration_ms: f64,
        project_id: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> SamResult<i64> {
        let status = ExecutionStatus::infer(success, error);
        let command_type = CommandType::detect(command);
        let output = truncate_chars(output, MAX_OUTPUT_CHARS);
        let error = truncate_chars(error, MAX_ERROR_CHARS);

        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO executions
                 (approval_id, project_id, command, command_type, status,
                  output, error, exit_code, duration_ms, created_at, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                approval_id,
                project_id,
                command,
                command_type.as_str(),
                status.as_str(),
                output,
                error,
                exit_code,
                duration_ms,
                Utc::now().to_rfc3339(),
                metadata.map(|v| v.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent(&self, limit: usize) -> SamResult<Vec<ExecutionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, approval_id, project_id, command, command_type, status, output, error,
                    exit_code, duration_ms, created_at, metadata
             FROM executions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn by_project(&self, project_id: &str, limit: usize) -> SamResult<Vec<ExecutionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, approval_id, project_id, command, command_type, status, output, error,
                    exit_code, duration_ms, created_at, metadata
             FROM executions WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![project_id, limit as i64], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregate statistics computed with one grouped query per category,
    /// never by loading every row into memory.
    pub fn stats(&self) -> SamResult<ExecutionStats> {
        let conn = self.conn.lock();
        let mut stats = ExecutionStats::default();

        {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM executions GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                stats.total_executions += count;
                match ExecutionStatus::parse(&status) {
                    Some(ExecutionStatus::Success) => stats.successful = count,
                    Some(ExecutionStatus::Failed) => stats.failed = count,
                    Some(ExecutionStatus::TimedOut) => stats.timed_out = count,
                    Some(ExecutionStatus::RolledBack) => stats.rolled_back = count,
                    None => {}
                }
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT command_type, COUNT(*) FROM executions GROUP BY command_type ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (command_type, count) = row?;
                stats.by_command_type.insert(command_type, count);
            }
        }

        {
            let mut stmt = conn.prepare(
                "SELECT project_id, COUNT(*) FROM executions
                 WHERE project_id IS NOT NULL GROUP BY project_id ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (project_id, count) = row?;
                stats.by_project.insert(project_id, count);
            }
        }

        let average: Option<f64> = conn.query_row(
            "SELECT AVG(duration_ms) FROM executions WHERE duration_ms > 0",
            [],
            |row| row.get(0),
        )?;
        stats.average_duration_ms = average.unwrap_or(0.0);

        Ok(stats)
    }

    pub fn export_json(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SamResult<String> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, approval_id, project_id, command, command_type, status, output, error,
                    exit_code, duration_ms, created_at, metadata
             FROM executions WHERE created_at >= ?1 AND created_at <= ?2 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let export = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "date_range": { "start": start.to_rfc3339(), "end": end.to_rfc3339() },
            "total_count": rows.len(),
            "executions": rows,
        });
        Ok(serde_json::to_string_pretty(&export)?)
    }

    pub fn mark_rolled_back(&self, approval_id: &str) -> SamResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE executions SET status = ?1 WHERE approval_id = ?2",
            params![ExecutionStatus::RolledBack.as_str(), approval_id],
        )?;
        Ok(changed > 0)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let command_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(10)?;
    let metadata: Option<String> = row.get(11)?;

    Ok(ExecutionRecord {
        id: row.get(0)?,
        approval_id: row.get(1)?,
        project_id: row.get(2)?,
        command: row.get(3)?,
        command_type: parse_command_type(&command_type),
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        output: row.get(6)?,
        error: row.get(7)?,
        exit_code: row.get(8)?,
        duration_ms: row.get(9)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

fn parse_command_type(raw: &str) -> CommandType {
    use CommandType::*;
    match raw {
        "git" => Git,
        "npm" => Npm,
        "yarn" => Yarn,
        "pip" => Pip,
        "python" => Python,
        "pytest" => Pytest,
        "docker" => Docker,
        "kubernetes" => Kubernetes,
        "homebrew" => Homebrew,
        "cargo" => Cargo,
        "go" => Go,
        "make" => Make,
        "cmake" => Cmake,
        "file_delete" => FileDelete,
        "file_move" => FileMove,
        "file_copy" => FileCopy,
        "directory" => Directory,
        "file_create" => FileCreate,
        "http" => Http,
        "ssh" => Ssh,
        "sync" => Sync,
        _ => Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_execution_is_classified_success() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        let id = log
            .log_execution(None, "git status", true, "clean", "", 0, 12.0, Some("demo"), None)
            .unwrap();
        let record = log.recent(1).unwrap().into_iter().next().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.command_type, CommandType::Git);
    }

    #[test]
    fn error_containing_timeout_is_classified_timed_out() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        log.log_execution(None, "cargo build", false, "", "operation timeout", 1, 0.0, None, None)
            .unwrap();
        let record = log.recent(1).unwrap().into_iter().next().unwrap();
        assert_eq!(record.status, ExecutionStatus::TimedOut);
    }

    #[test]
    fn other_failures_are_classified_failed() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        log.log_execution(None, "make", false, "", "no rule to make target", 2, 0.0, None, None)
            .unwrap();
        let record = log.recent(1).unwrap().into_iter().next().unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
    }

    #[test]
    fn output_and_error_are_truncated() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        let huge_output = "x".repeat(20_000);
        let huge_error = "y".repeat(20_000);
        log.log_execution(None, "cmd", false, &huge_output, &huge_error, 1, 0.0, None, None)
            .unwrap();
        let record = log.recent(1).unwrap().into_iter().next().unwrap();
        assert_eq!(record.output.chars().count(), MAX_OUTPUT_CHARS);
        assert_eq!(record.error.chars().count(), MAX_ERROR_CHARS);
    }

    #[test]
    fn ids_are_monotonically_increasing() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        let first = log
            .log_execution(None, "a", true, "", "", 0, 0.0, None, None)
            .unwrap();
        let second = log
            .log_execution(None, "b", true, "", "", 0, 0.0, None, None)
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn stats_aggregate_without_materializing_all_rows_in_app_code() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        log.log_execution(None, "git status", true, "", "", 0, 10.0, Some("demo"), None)
            .unwrap();
        log.log_execution(None, "git push", false, "", "denied", 1, 20.0, Some("demo"), None)
            .unwrap();
        let stats = log.stats().unwrap();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_project.get("demo"), Some(&2));
    }

    #[test]
    fn mark_rolled_back_updates_all_matching_rows() {
        let log = ExecutionAuditLog::in_memory().unwrap();
        log.log_execution(Some("appr-1"), "git commit", true, "", "", 0, 5.0, None, None)
            .unwrap();
        assert!(log.mark_rolled_back("appr-1").unwrap());
        let record = log.recent(1).unwrap().into_iter().next().unwrap();
        assert_eq!(record.status, ExecutionStatus::RolledBack);
    }
}

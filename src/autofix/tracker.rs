//! Per-file fix-outcome history, used by the auto-fix controller's
//! `should_skip` gate.
//!
//! A file that has recently failed or been reverted enough times is paused
//! regardless of confidence or rate-limit headroom — this is a second,
//! slower-moving brake on top of the hourly rate windows.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};

use crate::error::SamResult;

const FAILURE_THRESHOLD: i64 = 3;
const REVERT_THRESHOLD: i64 = 2;
const LOOKBACK_HOURS: i64 = 24;

pub fn init_schema(conn: &Connection) -> SamResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS file_fix_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id  TEXT NOT NULL,
            file_path   TEXT NOT NULL,
            event       TEXT NOT NULL,
            reason      TEXT,
            occurred_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_file_fix_events_lookup
            ON file_fix_events (project_id, file_path, event, occurred_at);
        "#,
    )?;
    Ok(())
}

pub fn record_event(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
    event: &str,
    reason: Option<&str>,
) -> SamResult<()> {
    conn.execute(
        "INSERT INTO file_fix_events (project_id, file_path, event, reason, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, file_path, event, reason, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn count_since(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
    event: &str,
    since: DateTime<Utc>,
) -> SamResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM file_fix_events
         WHERE project_id = ?1 AND file_path = ?2 AND event = ?3 AND occurred_at >= ?4",
        params![project_id, file_path, event, since.to_rfc3339()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Whether `file_path` should be paused for new auto-fixes, and why.
pub fn should_skip(
    conn: &Connection,
    project_id: &str,
    file_path: &str,
) -> SamResult<Option<String>> {
    let since = Utc::now() - Duration::hours(LOOKBACK_HOURS);
    let failures = count_since(conn, project_id, file_path, "failure", since)?;
    if failures >= FAILURE_THRESHOLD {
        return Ok(Some(format!(
            "{file_path} has {failures} failures in the last {LOOKBACK_HOURS}h"
        )));
    }
    let reverts = count_since(conn, project_id, file_path, "revert", since)?;
    if reverts >= REVERT_THRESHOLD {
        return Ok(Some(format!(
            "{file_path} has {reverts} reverts in the last {LOOKBACK_HOURS}h"
        )));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_after_threshold_failures() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        for _ in 0..3 {
            record_event(&conn, "demo", "a.py", "failure", Some("lint error")).unwrap();
        }
        assert!(should_skip(&conn, "demo", "a.py").unwrap().is_some());
    }

    #[test]
    fn does_not_skip_below_threshold() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        record_event(&conn, "demo", "a.py", "failure", None).unwrap();
        record_event(&conn, "demo", "a.py", "failure", None).unwrap();
        assert!(should_skip(&conn, "demo", "a.py").unwrap().is_none());
    }

    #[test]
    fn skips_after_threshold_reverts() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        record_event(&conn, "demo", "a.py", "revert", Some("broke tests")).unwrap();
        record_event(&conn, "demo", "a.py", "revert", Some("broke tests again")).unwrap();
        assert!(should_skip(&conn, "demo", "a.py").unwrap().is_some());
    }
}

//! Auto-Fix Controller: rate-limited, confidence-gated policy for automated
//! code fixes produced by external linters/formatters.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use glob::Pattern;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::SamResult;

use super::model::{
    AutoFixPermissions, AutoFixStats, DetectedIssue, FixResult, FixStatus, RateStatus,
    SECURITY_ISSUE_TYPES,
};
use super::tracker;

pub struct AutoFixController {
    conn: Mutex<Connection>,
}

fn current_hour_bucket() -> i64 {
    (Utc::now().timestamp() / 3600) * 3600
}

fn glob_matches(patterns: &[String], candidate: &str) -> bool {
    patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .any(|pattern| pattern.matches(candidate))
}

impl AutoFixController {
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
            CREATE TABLE IF NOT EXISTS permissions (
                project_id              TEXT PRIMARY KEY,
                enabled                 INTEGER NOT NULL,
                dry_run                 INTEGER NOT NULL,
                auto_commit             INTEGER NOT NULL,
                allowed_fix_types       TEXT NOT NULL,
                blocked_fix_types       TEXT NOT NULL,
                allowed_file_patterns   TEXT NOT NULL,
                blocked_file_patterns   TEXT NOT NULL,
                min_confidence          REAL NOT NULL,
                max_fixes_per_file      INTEGER NOT NULL,
                max_fixes_per_hour      INTEGER NOT NULL,
                require_review_threshold INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detected_issues (
                id            TEXT PRIMARY KEY,
                project_id    TEXT NOT NULL,
                issue_type    TEXT NOT NULL,
                file_path     TEXT NOT NULL,
                line          INTEGER NOT NULL,
                col           INTEGER,
                message       TEXT NOT NULL,
                suggested_fix TEXT NOT NULL,
                confidence    REAL NOT NULL,
                severity      TEXT NOT NULL,
                context       TEXT NOT NULL,
                detected_at   TEXT NOT NULL,
                status        TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fix_results (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id     TEXT NOT NULL,
                issue_id       TEXT NOT NULL,
                status         TEXT NOT NULL,
                applied_fix    TEXT NOT NULL,
                original_code  TEXT NOT NULL,
                error          TEXT,
                applied_at     TEXT NOT NULL,
                reverted       INTEGER NOT NULL DEFAULT 0,
                revert_reason  TEXT,
                commit_sha     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_fix_results_project ON fix_results(project_id);

            CREATE TABLE IF NOT EXISTS rate_limits (
                project_id   TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                fix_count    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (project_id, window_start)
            );

            CREATE TABLE IF NOT EXISTS file_fix_counts (
                project_id   TEXT NOT NULL,
                file_path    TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                fix_count    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (project_id, file_path, window_start)
            );
            "#,
        )?;
        tracker::init_schema(conn)?;
        Ok(())
    }

    pub fn get_permissions(&self, project_id: &str) -> SamResult<AutoFixPermissions> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT enabled, dry_run, auto_commit, allowed_fix_types, blocked_fix_types,
                        allowed_file_patterns, blocked_file_patterns, min_confidence,
                        max_fixes_per_file, max_fixes_per_hour, require_review_threshold
                 FROM permissions WHERE project_id = ?1",
                params![project_id],
                |row| {
                    Ok(AutoFixPermissions {
                        project_id: project_id.to_string(),
                        enabled: row.get(0)?,
                        dry_run: row.get(1)?,
                        auto_commit: row.get(2)?,
                        allowed_fix_types: decode(row.get::<_, String>(3)?),
                        blocked_fix_types: decode(row.get::<_, String>(4)?),
                        allowed_file_patterns: decode(row.get::<_, String>(5)?),
                        blocked_file_patterns: decode(row.get::<_, String>(6)?),
                        min_confidence: row.get(7)?,
                        max_fixes_per_file: row.get(8)?,
                        max_fixes_per_hour: row.get(9)?,
                        require_review_threshold: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_else(|| AutoFixPermissions::conservative(project_id)))
    }

    pub fn set_permissions(&self, perms: &AutoFixPermissions) -> SamResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO permissions
                 (project_id, enabled, dry_run, auto_commit, allowed_fix_types, blocked_fix_types,
                  allowed_file_patterns, blocked_file_patterns, min_confidence,
                  max_fixes_per_file, max_fixes_per_hour, require_review_threshold)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
               ON CONFLICT(project_id) DO UPDATE SET
                 enabled = excluded.enabled,
                 dry_run = excluded.dry_run,
                 auto_commit = excluded.auto_commit,
                 allowed_fix_types = excluded.allowed_fix_types,
                 blocked_fix_types = excluded.blocked_fix_types,
                 allowed_file_patterns = excluded.allowed_file_patterns,
                 blocked_file_patterns = excluded.blocked_file_patterns,
                 min_confidence = excluded.min_confidence,
                 max_fixes_per_file = excluded.max_fixes_per_file,
                 max_fixes_per_hour = excluded.max_fixes_per_hour,
                 require_review_threshold = excluded.require_review_threshold"#,
            params![
                perms.project_id,
                perms.enabled,
                perms.dry_run,
                perms.auto_commit,
                serde_json::to_string(&perms.allowed_fix_types)?,
                serde_json::to_string(&perms.blocked_fix_types)?,
                serde_json::to_string(&perms.allowed_file_patterns)?,
                serde_json::to_string(&perms.blocked_file_patterns)?,
                perms.min_confidence,
                perms.max_fixes_per_file,
                perms.max_fixes_per_hour,
                perms.require_review_threshold,
            ],
        )?;
        Ok(())
    }

    /// The ordered gate sequence; the first failing gate's reason is
    /// returned. Reaching the end means the issue is eligible.
    pub fn can_auto_fix(&self, project_id: &str, issue: &DetectedIssue) -> SamResult<(bool, String)> {
        let outcome = self.can_auto_fix_inner(project_id, issue)?;
        if !outcome.0 {
            tracing::debug!(project_id, file = issue.file_path, reason = outcome.1, "auto-fix gate denied");
        }
        Ok(outcome)
    }

    fn can_auto_fix_inner(&self, project_id: &str, issue: &DetectedIssue) -> SamResult<(bool, String)> {
        let perms = self.get_permissions(project_id)?;

        if !perms.enabled {
            return Ok((false, "disabled".to_string()));
        }
        if perms.dry_run {
            return Ok((false, "dry-run mode".to_string()));
        }
        if perms.blocked_fix_types.iter().any(|t| t == &issue.issue_type) {
            return Ok((false, format!("fix type {} is blocked", issue.issue_type)));
        }
        if !perms.allowed_fix_types.is_empty()
            && !perms.allowed_fix_types.iter().any(|t| t == &issue.issue_type)
        {
            return Ok((
                false,
                format!("fix type {} is not in the allowed set", issue.issue_type),
            ));
        }
        if perms.blocked_file_patterns.iter().any(|p| {
            Pattern::new(p)
                .map(|pattern| pattern.matches(&issue.file_path))
                .unwrap_or(false)
        }) {
            return Ok((false, format!("{} matches a blocked file pattern", issue.file_path)));
        }
        if !glob_matches(&perms.allowed_file_patterns, &issue.file_path) {
            return Ok((
                false,
                format!("{} does not match any allowed file pattern", issue.file_path),
            ));
        }
        if issue.confidence < perms.min_confidence {
            return Ok((
                false,
                format!(
                    "confidence {:.2} below minimum {:.2}",
                    issue.confidence, perms.min_confidence
                ),
            ));
        }

        let bucket = current_hour_bucket();
        let conn = self.conn.lock();

        let project_count: i64 = conn
            .query_row(
                "SELECT fix_count FROM rate_limits WHERE project_id = ?1 AND window_start = ?2",
                params![project_id, bucket],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        if project_count >= perms.max_fixes_per_hour as i64 {
            return Ok((
                false,
                format!(
                    "project fix rate exceeded: {project_count}/{} this hour",
                    perms.max_fixes_per_hour
                ),
            ));
        }

        let file_count: i64 = conn
            .query_row(
                "SELECT fix_count FROM file_fix_counts
                 WHERE project_id = ?1 AND file_path = ?2 AND window_start = ?3",
                params![project_id, issue.file_path, bucket],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        if file_count >= perms.max_fixes_per_file as i64 {
            return Ok((
                false,
                format!(
                    "file fix rate exceeded: {file_count}/{} this hour for {}",
                    perms.max_fixes_per_file, issue.file_path
                ),
            ));
        }

        if let Some(reason) = tracker::should_skip(&conn, project_id, &issue.file_path)? {
            return Ok((false, reason));
        }

        Ok((true, "eligible".to_string()))
    }

    pub fn should_require_review(&self, project_id: &str, issues: &[DetectedIssue]) -> SamResult<bool> {
        let perms = self.get_permissions(project_id)?;
        if issues.len() as u32 >= perms.require_review_threshold {
            return Ok(true);
        }
        if issues.iter().any(|issue| issue.confidence < 0.7) {
            return Ok(true);
        }
        if issues
            .iter()
            .any(|issue| SECURITY_ISSUE_TYPES.contains(&issue.issue_type.as_str()))
        {
            return Ok(true);
        }
        Ok(false)
    }

    pub fn rate_status(&self, project_id: &str) -> SamResult<RateStatus> {
        let perms = self.get_permissions(project_id)?;
        let bucket = current_hour_bucket();
        let conn = self.conn.lock();

        let project_fixes_this_hour: i64 = conn
            .query_row(
                "SELECT fix_count FROM rate_limits WHERE project_id = ?1 AND window_start = ?2",
                params![project_id, bucket],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        let mut stmt = conn.prepare(
            "SELECT file_path, fix_count FROM file_fix_counts
             WHERE project_id = ?1 AND window_start = ?2",
        )?;
        let per_file = stmt
            .query_map(params![project_id, bucket], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RateStatus {
            project_fixes_this_hour: project_fixes_this_hour as u32,
            max_fixes_per_hour: perms.max_fixes_per_hour,
            per_file,
        })
    }

    /// Persist the fix result and dispatch on its status: `Success`
    /// increments both rate windows and records a tracker success; `Failed`
    /// and `Skipped` record their respective tracker events; `Reverted`
    /// additionally flips the most recent prior `Success` row for this issue.
    pub fn record_fix(
        &self,
        project_id: &str,
        issue: &DetectedIssue,
        result: &FixResult,
    ) -> SamResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT OR REPLACE INTO detected_issues
               (id, project_id, issue_type, file_path, line, col, message, suggested_fix,
                confidence, severity, context, detected_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                issue.id,
                project_id,
                issue.issue_type,
                issue.file_path,
                issue.line,
                issue.col,
                issue.message,
                issue.suggested_fix,
                issue.confidence,
                issue.severity,
                issue.context,
                issue.detected_at.to_rfc3339(),
                serde_json::to_string(&issue.status)?,
            ],
        )?;

        conn.execute(
            "INSERT INTO fix_results
               (project_id, issue_id, status, applied_fix, original_code, error, applied_at,
                reverted, revert_reason, commit_sha)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                project_id,
                result.issue_id,
                serde_json::to_string(&result.status)?,
                result.applied_fix,
                result.original_code,
                result.error,
                result.applied_at.to_rfc3339(),
                result.reverted,
                result.revert_reason,
                result.commit_sha,
            ],
        )?;

        match result.status {
            FixStatus::Success => {
                let bucket = current_hour_bucket();
                conn.execute(
                    "INSERT INTO rate_limits (project_id, window_start, fix_count)
                     VALUES (?1, ?2, 1)
                     ON CONFLICT(project_id, window_start) DO UPDATE SET fix_count = fix_count + 1",
                    params![project_id, bucket],
                )?;
                conn.execute(
                    "INSERT INTO file_fix_counts (project_id, file_path, window_start, fix_count)
                     VALUES (?1, ?2, ?3, 1)
                     ON CONFLICT(project_id, file_path, window_start) DO UPDATE SET fix_count = fix_count + 1",
                    params![project_id, issue.file_path, bucket],
                )?;
                tracker::record_event(&conn, project_id, &issue.file_path, "success", None)?;
            }
            FixStatus::Failed => {
                tracker::record_event(
                    &conn,
                    project_id,
                    &issue.file_path,
                    "failure",
                    result.error.as_deref(),
                )?;
            }
            FixStatus::Skipped => {
                tracker::record_event(
                    &conn,
                    project_id,
                    &issue.file_path,
                    "skip",
                    result.revert_reason.as_deref(),
                )?;
            }
            FixStatus::Reverted => {
                tracker::record_event(
                    &conn,
                    project_id,
                    &issue.file_path,
                    "revert",
                    result.revert_reason.as_deref(),
                )?;
                conn.execute(
                    "UPDATE fix_results SET reverted = 1
                     WHERE rowid = (
                       SELECT rowid FROM fix_results
                       WHERE issue_id = ?1 AND status = 'success'
                       ORDER BY applied_at DESC LIMIT 1
                     )",
                    params![result.issue_id],
                )?;
            }
            FixStatus::PendingReview => {}
        }
        drop(conn);

        match result.status {
            FixStatus::Failed | FixStatus::Reverted => {
                tracing::warn!(project_id, file = issue.file_path, status = ?result.status, "fix outcome");
            }
            _ => tracing::debug!(project_id, file = issue.file_path, status = ?result.status, "fix outcome"),
        }

        Ok(())
    }

    pub fn stats(&self, project_id: &str) -> SamResult<AutoFixStats> {
        let conn = self.conn.lock();
        let mut stats = AutoFixStats::default();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM fix_results WHERE project_id = ?1 GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (status_json, count) in rows {
            stats.total_fixes += count;
            match status_json.as_str() {
                "\"success\"" => stats.successful = count,
                "\"failed\"" => stats.failed = count,
                "\"skipped\"" => stats.skipped = count,
                "\"reverted\"" => stats.reverted = count,
                "\"pending_review\"" => stats.pending_review = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Remove rate-window, tracker-event, and fix-result rows older than
    /// `days`. Default retention upstream is 90 days.
    pub fn cleanup(&self, days: i64) -> SamResult<usize> {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::days(days);
        let cutoff_bucket = cutoff.timestamp();
        let conn = self.conn.lock();

        let mut removed = 0usize;
        removed += conn.execute(
            "DELETE FROM rate_limits WHERE window_start < ?1",
            params![cutoff_bucket],
        )?;
        removed += conn.execute(
            "DELETE FROM file_fix_counts WHERE window_start < ?1",
            params![cutoff_bucket],
        )?;
        removed += conn.execute(
            "DELETE FROM file_fix_events WHERE occurred_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        removed += conn.execute(
            "DELETE FROM fix_results WHERE applied_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }
}

fn decode(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(file_path: &str, confidence: f64, issue_type: &str) -> DetectedIssue {
        DetectedIssue {
            id: "issue-1".to_string(),
            issue_type: issue_type.to_string(),
            file_path: file_path.to_string(),
            line: 10,
            col: None,
            message: "unused import".to_string(),
            suggested_fix: "remove import".to_string(),
            confidence,
            severity: "low".to_string(),
            context: "".to_string(),
            detected_at: Utc::now(),
            status: super::super::model::IssueStatus::Pending,
        }
    }

    fn fix_result(issue_id: &str, status: FixStatus) -> FixResult {
        FixResult {
            issue_id: issue_id.to_string(),
            status,
            applied_fix: "removed".to_string(),
            original_code: "import os".to_string(),
            error: None,
            applied_at: Utc::now(),
            reverted: false,
            revert_reason: None,
            commit_sha: None,
        }
    }

    #[test]
    fn disabled_project_denies_regardless_of_other_fields() {
        let controller = AutoFixController::in_memory().unwrap();
        let mut perms = AutoFixPermissions::conservative("demo");
        perms.enabled = false;
        controller.set_permissions(&perms).unwrap();

        let (allowed, reason) = controller
            .can_auto_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"))
            .unwrap();
        assert!(!allowed);
        assert_eq!(reason, "disabled");
    }

    #[test]
    fn low_confidence_is_denied() {
        let controller = AutoFixController::in_memory().unwrap();
        controller
            .set_permissions(&AutoFixPermissions::conservative("demo"))
            .unwrap();
        let (allowed, _) = controller
            .can_auto_fix("demo", &issue("src/a.py", 0.1, "UnusedImport"))
            .unwrap();
        assert!(!allowed);
    }

    #[test]
    fn type_in_both_lists_is_denied() {
        let controller = AutoFixController::in_memory().unwrap();
        let mut perms = AutoFixPermissions::conservative("demo");
        perms.allowed_fix_types = vec!["UnusedImport".to_string()];
        perms.blocked_fix_types = vec!["UnusedImport".to_string()];
        controller.set_permissions(&perms).unwrap();

        let (allowed, _) = controller
            .can_auto_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"))
            .unwrap();
        assert!(!allowed);
    }

    #[test]
    fn rate_limit_trips_after_max_successes_and_resets_next_hour() {
        let controller = AutoFixController::in_memory().unwrap();
        let mut perms = AutoFixPermissions::conservative("demo");
        perms.max_fixes_per_hour = 2;
        controller.set_permissions(&perms).unwrap();

        for _ in 0..2 {
            controller
                .record_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"), &fix_result("issue-1", FixStatus::Success))
                .unwrap();
        }

        let (allowed, reason) = controller
            .can_auto_fix("demo", &issue("src/b.py", 0.99, "UnusedImport"))
            .unwrap();
        assert!(!allowed);
        assert!(reason.contains("2/2"));
    }

    #[test]
    fn success_increments_exactly_both_counters() {
        let controller = AutoFixController::in_memory().unwrap();
        controller
            .set_permissions(&AutoFixPermissions::conservative("demo"))
            .unwrap();
        controller
            .record_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"), &fix_result("issue-1", FixStatus::Success))
            .unwrap();

        let status = controller.rate_status("demo").unwrap();
        assert_eq!(status.project_fixes_this_hour, 1);
        assert_eq!(status.per_file, vec![("src/a.py".to_string(), 1)]);
    }

    #[test]
    fn failure_does_not_increment_rate_counters() {
        let controller = AutoFixController::in_memory().unwrap();
        controller
            .set_permissions(&AutoFixPermissions::conservative("demo"))
            .unwrap();
        controller
            .record_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"), &fix_result("issue-1", FixStatus::Failed))
            .unwrap();

        let status = controller.rate_status("demo").unwrap();
        assert_eq!(status.project_fixes_this_hour, 0);
    }

    #[test]
    fn file_with_three_failures_is_skipped() {
        let controller = AutoFixController::in_memory().unwrap();
        controller
            .set_permissions(&AutoFixPermissions::conservative("demo"))
            .unwrap();
        for _ in 0..3 {
            controller
                .record_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"), &fix_result("issue-1", FixStatus::Failed))
                .unwrap();
        }
        let (allowed, reason) = controller
            .can_auto_fix("demo", &issue("src/a.py", 0.99, "UnusedImport"))
            .unwrap();
        assert!(!allowed);
        assert!(reason.contains("failures"));
    }

    #[test]
    fn security_issue_always_requires_review() {
        let controller = AutoFixController::in_memory().unwrap();
        let mut perms = AutoFixPermissions::conservative("demo");
        perms.require_review_threshold = 100;
        controller.set_permissions(&perms).unwrap();

        let issues = vec![issue("src/a.py", 0.99, "HardcodedSecret")];
        assert!(controller.should_require_review("demo", &issues).unwrap());
    }
}

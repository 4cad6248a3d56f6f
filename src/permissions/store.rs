//! Durable storage for [`ProjectPermissions`], process-wide defaults, and the
//! permission audit log.
//!
//! Lookup order for [`PermissionStore::get`]: a project-local
//! `<project_root>/.sam/permissions.json` override, if present, is absolute
//! — it is layered onto the process-wide defaults (deep-copied, `project_id`
//! filled in), never onto the project's database row, so no field the
//! override omits can inherit a value from that row. It is never copied back
//! into the database and is re-read on every call, so editing the file takes
//! effect immediately. Absent an override file, the project's database row
//! is used; absent that, the process-wide defaults are deep-copied with
//! `project_id` filled in.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::error::{SamError, SamResult};
use crate::risk::{NotificationLevel, RiskLevel};

use super::model::{AuditEntry, AuditKind, DefaultPermissions, Preset, ProjectPermissions};

const OVERRIDE_RELATIVE_PATH: &str = ".sam/permissions.json";

/// A project-local override file. Every field is individually optional, but
/// the override as a whole is absolute: when the file is present, the
/// effective permissions are built from the process defaults, never from the
/// project's database row, so a field the file omits resolves to the
/// default rather than to whatever the stored row happens to contain.
/// Unknown keys are rejected so a typo in the override file surfaces
/// immediately instead of silently being ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PermissionsOverride {
    allow_safe_auto_execute: Option<bool>,
    allow_moderate_with_approval: Option<bool>,
    block_dangerous: Option<bool>,
    require_dry_run_first: Option<bool>,
    auto_rollback_on_error: Option<bool>,
    allowed_commands: Option<Vec<String>>,
    blocked_commands: Option<Vec<String>>,
    allowed_paths: Option<Vec<String>>,
    blocked_paths: Option<Vec<String>>,
    max_timeout_seconds: Option<u32>,
    notification_level: Option<NotificationLevel>,
    notes: Option<String>,
}

impl PermissionsOverride {
    fn apply_to(self, mut base: ProjectPermissions) -> ProjectPermissions {
        if let Some(v) = self.allow_safe_auto_execute {
            base.allow_safe_auto_execute = v;
        }
        if let Some(v) = self.allow_moderate_with_approval {
            base.allow_moderate_with_approval = v;
        }
        if let Some(v) = self.block_dangerous {
            base.block_dangerous = v;
        }
        if let Some(v) = self.require_dry_run_first {
            base.require_dry_run_first = v;
        }
        if let Some(v) = self.auto_rollback_on_error {
            base.auto_rollback_on_error = v;
        }
        if let Some(v) = self.allowed_commands {
            base.allowed_commands = v;
        }
        if let Some(v) = self.blocked_commands {
            base.blocked_commands = v;
        }
        if let Some(v) = self.allowed_paths {
            base.allowed_paths = v;
        }
        if let Some(v) = self.blocked_paths {
            base.blocked_paths = v;
        }
        if let Some(v) = self.max_timeout_seconds {
            base.max_timeout_seconds = v;
        }
        if let Some(v) = self.notification_level {
            base.notification_level = v;
        }
        if let Some(v) = self.notes {
            base.notes = v;
        }
        base.clamp_timeout();
        base
    }
}

/// A freshly computed audit entry, before it is given an id and timestamp by
/// the store.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub project_id: String,
    pub kind: AuditKind,
    pub subject: String,
    pub risk_level: RiskLevel,
    pub allowed: bool,
    pub reason: String,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub output_preview: Option<String>,
}

pub struct PermissionStore {
    conn: Mutex<Connection>,
}

impl PermissionStore {
    pub fn open(path: &Path) -> SamResult<Self> {
        let conn = crate::db::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

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
            CREATE TABLE IF NOT EXISTS project_permissions (
                project_id               TEXT PRIMARY KEY,
                allow_safe_auto_execute  INTEGER NOT NULL,
                allow_moderate_with_approval INTEGER NOT NULL,
                block_dangerous          INTEGER NOT NULL,
                require_dry_run_first    INTEGER NOT NULL,
                auto_rollback_on_error   INTEGER NOT NULL,
                allowed_commands         TEXT NOT NULL,
                blocked_commands         TEXT NOT NULL,
                allowed_paths            TEXT NOT NULL,
                blocked_paths            TEXT NOT NULL,
                max_timeout_seconds      INTEGER NOT NULL,
                notification_level       TEXT NOT NULL,
                created_at               TEXT NOT NULL,
                updated_at               TEXT NOT NULL,
                notes                    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS default_permissions (
                id                       INTEGER PRIMARY KEY CHECK (id = 1),
                allow_safe_auto_execute  INTEGER NOT NULL,
                allow_moderate_with_approval INTEGER NOT NULL,
                block_dangerous          INTEGER NOT NULL,
                require_dry_run_first    INTEGER NOT NULL,
                auto_rollback_on_error   INTEGER NOT NULL,
                allowed_commands         TEXT NOT NULL,
                blocked_commands         TEXT NOT NULL,
                allowed_paths            TEXT NOT NULL,
                blocked_paths            TEXT NOT NULL,
                max_timeout_seconds      INTEGER NOT NULL,
                notification_level       TEXT NOT NULL,
                created_at               TEXT NOT NULL,
                updated_at               TEXT NOT NULL,
                notes                    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS permission_audit_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp       TEXT NOT NULL,
                project_id      TEXT NOT NULL,
                kind            TEXT NOT NULL,
                subject         TEXT NOT NULL,
                risk_level      TEXT NOT NULL,
                allowed         INTEGER NOT NULL,
                reason          TEXT NOT NULL,
                duration_ms     INTEGER,
                exit_code       INTEGER,
                output_preview  TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_permission_audit_project
                ON permission_audit_log (project_id);
            CREATE INDEX IF NOT EXISTS idx_permission_audit_timestamp
                ON permission_audit_log (timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Resolve the effective permissions for `project_id`. When `project_root`
    /// is given and `<project_root>/.sam/permissions.json` exists, it is
    /// parsed and applied on top of the process defaults — never the
    /// database row — for every call; it is never written back to the
    /// database. The override is absolute: a field the file omits takes the
    /// default, not the stored project's value, so the database row is not
    /// even consulted once an override file is found.
    pub fn get(
        &self,
        project_id: &str,
        project_root: Option<&Path>,
    ) -> SamResult<ProjectPermissions> {
        if let Some(root) = project_root {
            let override_path = root.join(OVERRIDE_RELATIVE_PATH);
            if override_path.is_file() {
                let raw = std::fs::read_to_string(&override_path)?;
                let parsed: PermissionsOverride =
                    serde_json::from_str(&raw).map_err(|source| SamError::InvalidOverride {
                        path: override_path,
                        source,
                    })?;
                let defaults = self.default_permissions_for(project_id)?;
                return Ok(parsed.apply_to(defaults));
            }
        }
        self.get_stored_or_default(project_id)
    }

    fn get_stored_or_default(&self, project_id: &str) -> SamResult<ProjectPermissions> {
        let conn = self.conn.lock();
        if let Some(perms) = Self::query_project_row(&conn, project_id)? {
            return Ok(perms);
        }
        drop(conn);
        self.default_permissions_for(project_id)
    }

    fn default_permissions_for(&self, project_id: &str) -> SamResult<ProjectPermissions> {
        let mut defaults = self.get_defaults()?;
        defaults.project_id = project_id.to_string();
        Ok(defaults)
    }

    fn query_project_row(
        conn: &Connection,
        project_id: &str,
    ) -> SamResult<Option<ProjectPermissions>> {
        conn.query_row(
            "SELECT project_id, allow_safe_auto_execute, allow_moderate_with_approval,
                    block_dangerous, require_dry_run_first, auto_rollback_on_error,
                    allowed_commands, blocked_commands, allowed_paths, blocked_paths,
                    max_timeout_seconds, notification_level, created_at, updated_at, notes
             FROM project_permissions WHERE project_id = ?1",
            params![project_id],
            row_to_permissions,
        )
        .optional()
        .map_err(SamError::from)
    }

    pub fn set(&self, mut perms: ProjectPermissions) -> SamResult<()> {
        perms.clamp_timeout();
        perms.touch();
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO project_permissions (
                 project_id, allow_safe_auto_execute, allow_moderate_with_approval,
                 block_dangerous, require_dry_run_first, auto_rollback_on_error,
                 allowed_commands, blocked_commands, allowed_paths, blocked_paths,
                 max_timeout_seconds, notification_level, created_at, updated_at, notes
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
               ON CONFLICT(project_id) DO UPDATE SET
                 allow_safe_auto_execute = excluded.allow_safe_auto_execute,
                 allow_moderate_with_approval = excluded.allow_moderate_with_approval,
                 block_dangerous = excluded.block_dangerous,
                 require_dry_run_first = excluded.require_dry_run_first,
                 auto_rollback_on_error = excluded.auto_rollback_on_error,
                 allowed_commands = excluded.allowed_commands,
                 blocked_commands = excluded.blocked_commands,
                 allowed_paths = excluded.allowed_paths,
                 blocked_paths = excluded.blocked_paths,
                 max_timeout_seconds = excluded.max_timeout_seconds,
                 notification_level = excluded.notification_level,
                 updated_at = excluded.updated_at,
                 notes = excluded.notes"#,
            params![
                perms.project_id,
                perms.allow_safe_auto_execute,
                perms.allow_moderate_with_approval,
                perms.block_dangerous,
                perms.require_dry_run_first,
                perms.auto_rollback_on_error,
                serde_json::to_string(&perms.allowed_commands)?,
                serde_json::to_string(&perms.blocked_commands)?,
                serde_json::to_string(&perms.allowed_paths)?,
                serde_json::to_string(&perms.blocked_paths)?,
                perms.max_timeout_seconds,
                serde_json::to_string(&perms.notification_level)?,
                perms.created_at.to_rfc3339(),
                perms.updated_at.to_rfc3339(),
                perms.notes,
            ],
        )?;
        Ok(())
    }

    pub fn get_defaults(&self) -> SamResult<ProjectPermissions> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT 'default', allow_safe_auto_execute, allow_moderate_with_approval,
                        block_dangerous, require_dry_run_first, auto_rollback_on_error,
                        allowed_commands, blocked_commands, allowed_paths, blocked_paths,
                        max_timeout_seconds, notification_level, created_at, updated_at, notes
                 FROM default_permissions WHERE id = 1",
                [],
                row_to_permissions,
            )
            .optional()?;
        Ok(row.unwrap_or_else(|| DefaultPermissions::default().0))
    }

    pub fn set_defaults(&self, mut perms: ProjectPermissions) -> SamResult<()> {
        perms.clamp_timeout();
        perms.touch();
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO default_permissions (
                 id, allow_safe_auto_execute, allow_moderate_with_approval,
                 block_dangerous, require_dry_run_first, auto_rollback_on_error,
                 allowed_commands, blocked_commands, allowed_paths, blocked_paths,
                 max_timeout_seconds, notification_level, created_at, updated_at, notes
               ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
               ON CONFLICT(id) DO UPDATE SET
                 allow_safe_auto_execute = excluded.allow_safe_auto_execute,
                 allow_moderate_with_approval = excluded.allow_moderate_with_approval,
                 block_dangerous = excluded.block_dangerous,
                 require_dry_run_first = excluded.require_dry_run_first,
                 auto_rollback_on_error = excluded.auto_rollback_on_error,
                 allowed_commands = excluded.allowed_commands,
                 blocked_commands = excluded.blocked_commands,
                 allowed_paths = excluded.allowed_paths,
                 blocked_paths = excluded.blocked_paths,
                 max_timeout_seconds = excluded.max_timeout_seconds,
                 notification_level = excluded.notification_level,
                 updated_at = excluded.updated_at,
                 notes = excluded.notes"#,
            params![
                perms.allow_safe_auto_execute,
                perms.allow_moderate_with_approval,
                perms.block_dangerous,
                perms.require_dry_run_first,
                perms.auto_rollback_on_error,
                serde_json::to_string(&perms.allowed_commands)?,
                serde_json::to_string(&perms.blocked_commands)?,
                serde_json::to_string(&perms.allowed_paths)?,
                serde_json::to_string(&perms.blocked_paths)?,
                perms.max_timeout_seconds,
                serde_json::to_string(&perms.notification_level)?,
                perms.created_at.to_rfc3339(),
                perms.updated_at.to_rfc3339(),
                perms.notes,
            ],
        )?;
        Ok(())
    }

    pub fn apply_preset(&self, project_id: &str, preset: Preset) -> SamResult<ProjectPermissions> {
        let perms = preset.apply(project_id);
        self.set(perms.clone())?;
        Ok(perms)
    }

    pub fn list_projects(&self) -> SamResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT project_id FROM project_permissions ORDER BY project_id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Append one audit entry and return it with its assigned id and
    /// timestamp filled in. Every call to the engine's `can_execute` or
    /// `can_modify_path` produces exactly one of these.
    pub fn record_audit(&self, new_entry: NewAuditEntry) -> SamResult<AuditEntry> {
        let timestamp = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO permission_audit_log (
                 timestamp, project_id, kind, subject, risk_level, allowed, reason,
                 duration_ms, exit_code, output_preview
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                timestamp.to_rfc3339(),
                new_entry.project_id,
                serde_json::to_string(&new_entry.kind)?,
                new_entry.subject,
                serde_json::to_string(&new_entry.risk_level)?,
                new_entry.allowed,
                new_entry.reason,
                new_entry.duration_ms,
                new_entry.exit_code,
                new_entry.output_preview,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(AuditEntry {
            id,
            timestamp,
            project_id: new_entry.project_id,
            kind: new_entry.kind,
            subject: new_entry.subject,
            risk_level: new_entry.risk_level,
            allowed: new_entry.allowed,
            reason: new_entry.reason,
            duration_ms: new_entry.duration_ms,
            exit_code: new_entry.exit_code,
            output_preview: new_entry.output_preview,
        })
    }

    pub fn audit(&self, project_id: Option<&str>, limit: usize) -> SamResult<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = match project_id {
            Some(_) => conn.prepare(
                "SELECT id, timestamp, project_id, kind, subject, risk_level, allowed, reason,
                        duration_ms, exit_code, output_preview
                 FROM permission_audit_log WHERE project_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?,
            None => conn.prepare(
                "SELECT id, timestamp, project_id, kind, subject, risk_level, allowed, reason,
                        duration_ms, exit_code, output_preview
                 FROM permission_audit_log ORDER BY id DESC LIMIT ?1",
            )?,
        };

        let rows = match project_id {
            Some(pid) => stmt
                .query_map(params![pid, limit as i64], row_to_audit_entry)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![limit as i64], row_to_audit_entry)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

fn row_to_permissions(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectPermissions> {
    let allowed_commands: String = row.get(6)?;
    let blocked_commands: String = row.get(7)?;
    let allowed_paths: String = row.get(8)?;
    let blocked_paths: String = row.get(9)?;
    let notification_level: String = row.get(11)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(ProjectPermissions {
        project_id: row.get(0)?,
        allow_safe_auto_execute: row.get(1)?,
        allow_moderate_with_approval: row.get(2)?,
        block_dangerous: row.get(3)?,
        require_dry_run_first: row.get(4)?,
        auto_rollback_on_error: row.get(5)?,
        allowed_commands: decode_json_column(&allowed_commands)?,
        blocked_commands: decode_json_column(&blocked_commands)?,
        allowed_paths: decode_json_column(&allowed_paths)?,
        blocked_paths: decode_json_column(&blocked_paths)?,
        max_timeout_seconds: row.get(10)?,
        notification_level: decode_json_column(&notification_level)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        notes: row.get(14)?,
    })
}

fn row_to_audit_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let kind: String = row.get(3)?;
    let risk_level: String = row.get(5)?;
    let timestamp: String = row.get(1)?;

    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: parse_timestamp(&timestamp),
        project_id: row.get(2)?,
        kind: decode_json_column(&kind)?,
        subject: row.get(4)?,
        risk_level: decode_json_column(&risk_level)?,
        allowed: row.get(6)?,
        reason: row.get(7)?,
        duration_ms: row.get(8)?,
        exit_code: row.get(9)?,
        output_preview: row.get(10)?,
    })
}

/// Decode a JSON-encoded column written by this same store. A failure here
/// means the database was corrupted or hand-edited, not a recoverable input
/// error, so it is surfaced as a storage error rather than silently defaulted.
fn decode_json_column<T: for<'de> Deserialize<'de>>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_project_falls_back_to_defaults() {
        let store = PermissionStore::in_memory().unwrap();
        let perms = store.get("demo", None).unwrap();
        assert_eq!(perms.project_id, "demo");
        assert!(perms.allow_safe_auto_execute);
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = PermissionStore::in_memory().unwrap();
        let mut perms = ProjectPermissions::normal("demo");
        perms.notes = "reviewed by alice".to_string();
        perms.blocked_commands.push("git push --force".to_string());
        store.set(perms).unwrap();

        let fetched = store.get("demo", None).unwrap();
        assert_eq!(fetched.notes, "reviewed by alice");
        assert_eq!(fetched.blocked_commands, vec!["git push --force"]);
    }

    #[test]
    fn project_local_override_is_absolute_not_merged_with_stored_row() {
        let store = PermissionStore::in_memory().unwrap();

        // A stored row whose values disagree with the defaults in every
        // field the override below leaves unset.
        store.apply_preset("demo", Preset::Strict).unwrap();
        let mut stored = store.get("demo", None).unwrap();
        stored.blocked_commands.push("git push".to_string());
        store.set(stored).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".sam")).unwrap();
        std::fs::write(
            dir.path().join(".sam/permissions.json"),
            r#"{"block_dangerous": false, "notes": "override active"}"#,
        )
        .unwrap();

        let perms = store.get("demo", Some(dir.path())).unwrap();
        assert!(!perms.block_dangerous);
        assert_eq!(perms.notes, "override active");

        // Fields the override omits take the process default, not the
        // stored Strict row's values — the override never merges with the
        // database.
        let defaults = store.get_defaults().unwrap();
        assert_eq!(perms.allow_safe_auto_execute, defaults.allow_safe_auto_execute);
        assert!(perms.blocked_commands.is_empty());

        // The database itself was never touched by the override.
        let stored_again = store.get("demo", None).unwrap();
        assert!(stored_again.block_dangerous);
        assert_eq!(stored_again.blocked_commands, vec!["git push"]);
    }

    #[test]
    fn malformed_override_is_reported_not_ignored() {
        let store = PermissionStore::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".sam")).unwrap();
        std::fs::write(
            dir.path().join(".sam/permissions.json"),
            r#"{"not_a_real_field": true}"#,
        )
        .unwrap();

        let result = store.get("demo", Some(dir.path()));
        assert!(matches!(result, Err(SamError::InvalidOverride { .. })));
    }

    #[test]
    fn preset_is_persisted_and_retrievable() {
        let store = PermissionStore::in_memory().unwrap();
        store.apply_preset("demo", Preset::Strict).unwrap();
        let perms = store.get("demo", None).unwrap();
        assert!(!perms.allow_safe_auto_execute);
    }

    #[test]
    fn audit_log_orders_most_recent_first() {
        let store = PermissionStore::in_memory().unwrap();
        for subject in ["git status", "git push"] {
            store
                .record_audit(NewAuditEntry {
                    project_id: "demo".to_string(),
                    kind: AuditKind::Execute,
                    subject: subject.to_string(),
                    risk_level: RiskLevel::Safe,
                    allowed: true,
                    reason: "test".to_string(),
                    duration_ms: None,
                    exit_code: None,
                    output_preview: None,
                })
                .unwrap();
        }
        let entries = store.audit(Some("demo"), 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subject, "git push");
    }
}

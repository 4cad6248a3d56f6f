//! Checkpoint & Rollback Store: compressed file backups plus atomic restore.
//!
//! Ported from `RollbackManager` in the original Python "SAM" brain: one
//! gzip blob per backed-up file, named by replacing path separators with
//! `__`, indexed by a `path_mapping.json` file living alongside the blobs in
//! `<backup_dir>/<checkpoint_id>/`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{SamError, SamResult};

use super::model::{Checkpoint, CheckpointInfo, CheckpointStatus, CommandLog, ExecutionResult, RollbackResult};

pub struct CheckpointStore {
    conn: Mutex<Connection>,
    backup_dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(db_path: &Path, backup_dir: &Path) -> SamResult<Self> {
        std::fs::create_dir_all(backup_dir)?;
        let conn = crate::db::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            backup_dir: backup_dir.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn in_memory(backup_dir: &Path) -> SamResult<Self> {
        std::fs::create_dir_all(backup_dir)?;
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            backup_dir: backup_dir.to_path_buf(),
        })
    }

    fn init_schema(conn: &Connection) -> SamResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id                 TEXT PRIMARY KEY,
                project_id         TEXT NOT NULL,
                description        TEXT NOT NULL,
                created_at         TEXT NOT NULL,
                files_backed_up    TEXT NOT NULL,
                commands_executed  TEXT NOT NULL,
                status             TEXT NOT NULL DEFAULT 'active',
                rolled_back_at     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_project ON checkpoints(project_id);
            CREATE INDEX IF NOT EXISTS idx_checkpoints_status ON checkpoints(status);
            "#,
        )?;
        Ok(())
    }

    fn checkpoint_dir(&self, checkpoint_id: &str) -> PathBuf {
        self.backup_dir.join(checkpoint_id)
    }

    pub fn create(&self, project_id: &str, description: &str) -> SamResult<String> {
        let checkpoint_id = Uuid::new_v4().to_string();
        std::fs::create_dir_all(self.checkpoint_dir(&checkpoint_id))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO checkpoints
               (id, project_id, description, created_at, files_backed_up, commands_executed, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                checkpoint_id,
                project_id,
                description,
                Utc::now().to_rfc3339(),
                "[]",
                "[]",
                CheckpointStatus::Active.as_str(),
            ],
        )?;
        Ok(checkpoint_id)
    }

    /// Gzip-compress `file_path` into the checkpoint's backup directory and
    /// record the mapping needed to restore it later. Returns `Ok(false)`
    /// (never an error) when the file does not exist or is not a regular
    /// file — that is an ordinary "nothing to back up" outcome, not a
    /// storage failure.
    pub fn add_file_backup(&self, checkpoint_id: &str, file_path: &Path) -> SamResult<bool> {
        let resolved = file_path
            .canonicalize()
            .unwrap_or_else(|_| file_path.to_path_buf());

        if !resolved.exists() || !resolved.is_file() {
            return Ok(false);
        }

        let checkpoint_dir = self.checkpoint_dir(checkpoint_id);
        if !checkpoint_dir.is_dir() {
            return Ok(false);
        }

        let resolved_str = resolved.to_string_lossy().to_string();
        let safe_name = resolved_str.replace(['/', '\\'], "__");
        let backup_path = checkpoint_dir.join(format!("{safe_name}.gz"));

        let mut input = std::fs::File::open(&resolved)?;
        let output = std::fs::File::create(&backup_path)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;

        let mapping_path = checkpoint_dir.join("path_mapping.json");
        let mut mapping: std::collections::HashMap<String, String> = if mapping_path.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&mapping_path)?)?
        } else {
            std::collections::HashMap::new()
        };
        mapping.insert(safe_name, resolved_str.clone());
        let tmp_path = checkpoint_dir.join("path_mapping.json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(&mapping)?)?;
        std::fs::rename(&tmp_path, &mapping_path)?;

        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT files_backed_up FROM checkpoints WHERE id = ?1",
                params![checkpoint_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(raw) = raw {
            let mut files: Vec<String> = serde_json::from_str(&raw)?;
            if !files.contains(&resolved_str) {
                files.push(resolved_str);
                conn.execute(
                    "UPDATE checkpoints SET files_backed_up = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&files)?, checkpoint_id],
                )?;
            }
        }

        Ok(true)
    }

    pub fn add_command_log(
        &self,
        checkpoint_id: &str,
        command: &str,
        result: ExecutionResult,
        duration_ms: f64,
    ) -> SamResult<bool> {
        let log = CommandLog {
            command: command.to_string(),
            result,
            timestamp: Utc::now(),
            duration_ms,
        };

        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT commands_executed FROM checkpoints WHERE id = ?1",
                params![checkpoint_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(false);
        };

        let mut commands: Vec<CommandLog> = serde_json::from_str(&raw)?;
        commands.push(log);
        conn.execute(
            "UPDATE checkpoints SET commands_executed = ?1 WHERE id = ?2",
            params![serde_json::to_string(&commands)?, checkpoint_id],
        )?;
        Ok(true)
    }

    /// Restore every backed-up file for `checkpoint_id`. A file that fails to
    /// restore does not abort the rest: it is recorded in `errors` and the
    /// restore continues with the next mapping entry.
    pub fn rollback(&self, checkpoint_id: &str) -> SamResult<RollbackResult> {
        let mut result = RollbackResult {
            checkpoint_id: checkpoint_id.to_string(),
            ..Default::default()
        };

        let checkpoint_dir = self.checkpoint_dir(checkpoint_id);
        if !checkpoint_dir.is_dir() {
            result
                .errors
                .push(format!("checkpoint backup directory not found: {checkpoint_id}"));
            return Ok(result);
        }

        let mapping_path = checkpoint_dir.join("path_mapping.json");
        if !mapping_path.is_file() {
            result
                .errors
                .push("no path mapping found - no files to restore".to_string());
            result.success = true;
            return Ok(result);
        }

        let mapping: std::collections::HashMap<String, String> =
            match std::fs::read_to_string(&mapping_path)
                .map_err(SamError::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(SamError::from))
            {
                Ok(mapping) => mapping,
                Err(e) => {
                    result.errors.push(format!("failed to load path mapping: {e}"));
                    return Ok(result);
                }
            };

        for (safe_name, original_path) in &mapping {
            let backup_path = checkpoint_dir.join(format!("{safe_name}.gz"));
            if !backup_path.is_file() {
                result
                    .errors
                    .push(format!("backup file not found: {}", backup_path.display()));
                result.partial = true;
                continue;
            }

            match restore_one(&backup_path, Path::new(original_path)) {
                Ok(()) => result.files_restored.push(original_path.clone()),
                Err(e) => {
                    result
                        .errors
                        .push(format!("failed to restore {original_path}: {e}"));
                    result.partial = true;
                }
            }
        }

        let conn = self.conn.lock();
        conn.execute(
            "UPDATE checkpoints SET status = ?1, rolled_back_at = ?2 WHERE id = ?3",
            params![
                CheckpointStatus::RolledBack.as_str(),
                Utc::now().to_rfc3339(),
                checkpoint_id,
            ],
        )?;
        drop(conn);

        let result = result.finalize();
        if result.partial {
            tracing::warn!(checkpoint_id, errors = ?result.errors, "partial rollback");
        } else {
            tracing::debug!(checkpoint_id, restored = result.files_restored.len(), "rollback complete");
        }
        Ok(result)
    }

    pub fn list(&self, project_id: &str, limit: usize) -> SamResult<Vec<CheckpointInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, description, created_at, files_backed_up, commands_executed, status
             FROM checkpoints WHERE project_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![project_id, limit as i64], |row| {
                let id: String = row.get(0)?;
                let files_raw: String = row.get(4)?;
                let commands_raw: String = row.get(5)?;
                let status_raw: String = row.get(6)?;
                let created_at: String = row.get(3)?;
                Ok((id, row.get::<_, String>(1)?, row.get::<_, String>(2)?, created_at, files_raw, commands_raw, status_raw))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter()
            .map(|(id, project_id, description, created_at, files_raw, commands_raw, status_raw)| {
                let files: Vec<String> = serde_json::from_str(&files_raw)?;
                let commands: Vec<CommandLog> = serde_json::from_str(&commands_raw)?;
                let status = CheckpointStatus::parse(&status_raw)
                    .ok_or_else(|| SamError::validation(format!("unknown checkpoint status {status_raw}")))?;
                let backup_size_bytes = self.backup_size(&id);
                Ok(CheckpointInfo {
                    id,
                    project_id,
                    description,
                    created_at: parse_timestamp(&created_at),
                    file_count: files.len(),
                    command_count: commands.len(),
                    status,
                    backup_size_bytes,
                })
            })
            .collect()
    }

    fn backup_size(&self, checkpoint_id: &str) -> u64 {
        let dir = self.checkpoint_dir(checkpoint_id);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "gz"))
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    pub fn details(&self, checkpoint_id: &str) -> SamResult<Option<Checkpoint>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, project_id, description, created_at, files_backed_up,
                        commands_executed, status, rolled_back_at
                 FROM checkpoints WHERE id = ?1",
                params![checkpoint_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, project_id, description, created_at, files_raw, commands_raw, status_raw, rolled_back_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(Checkpoint {
            id,
            project_id,
            description,
            created_at: parse_timestamp(&created_at),
            files_backed_up: serde_json::from_str(&files_raw)?,
            commands_executed: serde_json::from_str(&commands_raw)?,
            status: CheckpointStatus::parse(&status_raw)
                .ok_or_else(|| SamError::validation(format!("unknown checkpoint status {status_raw}")))?,
            rolled_back_at: rolled_back_at.map(|raw| parse_timestamp(&raw)),
        }))
    }

    /// Delete checkpoints created more than `days` ago. Checkpoints already
    /// `RolledBack` are left alone regardless of age.
    pub fn cleanup_old(&self, days: i64) -> SamResult<usize> {
        let cutoff = Utc::now() - Duration::days(days);

        let candidates: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id FROM checkpoints WHERE created_at < ?1 AND status != ?2",
            )?;
            stmt.query_map(
                params![cutoff.to_rfc3339(), CheckpointStatus::RolledBack.as_str()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut removed = 0;
        for checkpoint_id in candidates {
            let dir = self.checkpoint_dir(&checkpoint_id);
            if dir.is_dir() && std::fs::remove_dir_all(&dir).is_err() {
                continue;
            }
            let conn = self.conn.lock();
            conn.execute("DELETE FROM checkpoints WHERE id = ?1", params![checkpoint_id])?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn restore_one(backup_path: &Path, original_path: &Path) -> SamResult<()> {
    if let Some(parent) = original_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut decoder = GzDecoder::new(std::fs::File::open(backup_path)?);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    let mut out = std::fs::File::create(original_path)?;
    out.write_all(&buf)?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

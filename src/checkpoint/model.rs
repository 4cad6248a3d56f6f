//! Data model for checkpoints and rollback results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a [`Checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    RolledBack,
    Expired,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Active => "active",
            CheckpointStatus::RolledBack => "rolled_back",
            CheckpointStatus::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "rolled_back" => Some(Self::RolledBack),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Outcome of one command execution, as recorded against a checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One command run after a checkpoint was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLog {
    pub command: String,
    pub result: ExecutionResult,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
}

/// A named save point: a set of file backups plus the commands run since.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub project_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub files_backed_up: Vec<String>,
    pub commands_executed: Vec<CommandLog>,
    pub status: CheckpointStatus,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

/// Summary view of a checkpoint, returned by listing without loading full
/// command/file detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub project_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub command_count: usize,
    pub status: CheckpointStatus,
    pub backup_size_bytes: u64,
}

/// Outcome of restoring a checkpoint's backed-up files.
///
/// `success` is true either when every file restored cleanly, or when at
/// least one file restored despite some failing — a fully-empty restore with
/// errors is the only failure case. This mirrors the original rollback
/// manager's leniency: a partial rollback that recovered *something* is still
/// reported as a usable outcome, with `partial` set so the caller can warn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub files_restored: Vec<String>,
    pub errors: Vec<String>,
    pub partial: bool,
    pub checkpoint_id: String,
}

impl RollbackResult {
    pub fn finalize(mut self) -> Self {
        self.success = !self.partial || !self.files_restored.is_empty();
        self
    }
}

//! Data model for the execution audit log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one logged execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    TimedOut,
    RolledBack,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Infer status from an execution outcome: success wins outright;
    /// otherwise a case-insensitive "timeout" substring in the error message
    /// is the one caller-to-core signaling convention the core understands.
    pub fn infer(success: bool, error: &str) -> Self {
        if success {
            Self::Success
        } else if error.to_lowercase().contains("timeout") {
            Self::TimedOut
        } else {
            Self::Failed
        }
    }
}

/// A tool family, inferred purely from the command's leading token. Used
/// only to populate statistics — never consulted by the permission engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Git,
    Npm,
    Yarn,
    Pip,
    Python,
    Pytest,
    Docker,
    Kubernetes,
    Homebrew,
    Cargo,
    Go,
    Make,
    Cmake,
    FileDelete,
    FileMove,
    FileCopy,
    Directory,
    FileCreate,
    Http,
    Ssh,
    Sync,
    Other,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Git => "git",
            CommandType::Npm => "npm",
            CommandType::Yarn => "yarn",
            CommandType::Pip => "pip",
            CommandType::Python => "python",
            CommandType::Pytest => "pytest",
            CommandType::Docker => "docker",
            CommandType::Kubernetes => "kubernetes",
            CommandType::Homebrew => "homebrew",
            CommandType::Cargo => "cargo",
            CommandType::Go => "go",
            CommandType::Make => "make",
            CommandType::Cmake => "cmake",
            CommandType::FileDelete => "file_delete",
            CommandType::FileMove => "file_move",
            CommandType::FileCopy => "file_copy",
            CommandType::Directory => "directory",
            CommandType::FileCreate => "file_create",
            CommandType::Http => "http",
            CommandType::Ssh => "ssh",
            CommandType::Sync => "sync",
            CommandType::Other => "other",
        }
    }

    /// Total function from a command line's leading token to a family.
    pub fn detect(command: &str) -> Self {
        let lowered = command.trim().to_lowercase();
        const PREFIXES: &[(&str, CommandType)] = &[
            ("git ", CommandType::Git),
            ("npm ", CommandType::Npm),
            ("yarn ", CommandType::Yarn),
            ("pip ", CommandType::Pip),
            ("python", CommandType::Python),
            ("pytest", CommandType::Pytest),
            ("docker ", CommandType::Docker),
            ("kubectl ", CommandType::Kubernetes),
            ("brew ", CommandType::Homebrew),
            ("cargo ", CommandType::Cargo),
            ("go ", CommandType::Go),
            ("make", CommandType::Make),
            ("cmake", CommandType::Cmake),
            ("rm ", CommandType::FileDelete),
            ("mv ", CommandType::FileMove),
            ("cp ", CommandType::FileCopy),
            ("mkdir", CommandType::Directory),
            ("touch", CommandType::FileCreate),
            ("curl ", CommandType::Http),
            ("wget ", CommandType::Http),
            ("ssh ", CommandType::Ssh),
            ("scp ", CommandType::Ssh),
            ("rsync", CommandType::Sync),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(CommandType::Other)
    }
}

/// One append-only execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub approval_id: Option<String>,
    pub project_id: Option<String>,
    pub command: String,
    pub command_type: CommandType,
    pub status: ExecutionStatus,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub duration_ms: f64,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Aggregated statistics across all execution history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: i64,
    pub successful: i64,
    pub failed: i64,
    pub timed_out: i64,
    pub rolled_back: i64,
    pub by_command_type: HashMap<String, i64>,
    pub by_project: HashMap<String, i64>,
    pub average_duration_ms: f64,
}

//! Data model for the auto-fix controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue types that are always subject to mandatory review, independent of
/// any project's `allowed_fix_types` list.
pub const SECURITY_ISSUE_TYPES: &[&str] =
    &["HardcodedSecret", "SqlInjectionRisk", "SecurityVulnerability"];

/// Parallel to `ProjectPermissions`, but governs issue-driven fixes rather
/// than arbitrary commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixPermissions {
    #[serde(default)]
    pub project_id: String,
    pub enabled: bool,
    pub dry_run: bool,
    pub auto_commit: bool,
    #[serde(default)]
    pub allowed_fix_types: Vec<String>,
    #[serde(default)]
    pub blocked_fix_types: Vec<String>,
    #[serde(default)]
    pub allowed_file_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_file_patterns: Vec<String>,
    pub min_confidence: f64,
    pub max_fixes_per_file: u32,
    pub max_fixes_per_hour: u32,
    pub require_review_threshold: u32,
}

impl AutoFixPermissions {
    pub fn conservative(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            enabled: true,
            dry_run: false,
            auto_commit: false,
            allowed_fix_types: Vec::new(),
            blocked_fix_types: Vec::new(),
            allowed_file_patterns: vec!["**/*".to_string()],
            blocked_file_patterns: Vec::new(),
            min_confidence: 0.8,
            max_fixes_per_file: 5,
            max_fixes_per_hour: 20,
            require_review_threshold: 5,
        }
    }
}

/// Lifecycle status of a [`DetectedIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    Fixed,
    Skipped,
    Ignored,
}

/// An issue surfaced by an external linter or formatter, not produced by
/// this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub id: String,
    pub issue_type: String,
    pub file_path: String,
    pub line: u32,
    pub col: Option<u32>,
    pub message: String,
    pub suggested_fix: String,
    pub confidence: f64,
    pub severity: String,
    pub context: String,
    pub detected_at: DateTime<Utc>,
    pub status: IssueStatus,
}

/// Outcome of one attempted fix, as reported by the subprocess-runner that
/// actually applied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Success,
    Failed,
    Skipped,
    Reverted,
    PendingReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixResult {
    pub issue_id: String,
    pub status: FixStatus,
    pub applied_fix: String,
    pub original_code: String,
    pub error: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub reverted: bool,
    pub revert_reason: Option<String>,
    pub commit_sha: Option<String>,
}

/// Aggregated per-project auto-fix statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoFixStats {
    pub total_fixes: i64,
    pub successful: i64,
    pub failed: i64,
    pub skipped: i64,
    pub reverted: i64,
    pub pending_review: i64,
}

/// Snapshot of current rate-window usage for a project, returned by
/// `rate_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateStatus {
    pub project_fixes_this_hour: u32,
    pub max_fixes_per_hour: u32,
    pub per_file: Vec<(String, u32)>,
}

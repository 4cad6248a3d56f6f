//! Data model for per-project execution permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::risk::{NotificationLevel, RiskLevel};

/// The authoritative policy for one project id.
///
/// Invariants: `block_dangerous = true` implies any `Dangerous` command is
/// denied; `blocked_*` always takes precedence over `allowed_*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPermissions {
    #[serde(default)]
    pub project_id: String,

    pub allow_safe_auto_execute: bool,
    pub allow_moderate_with_approval: bool,
    pub block_dangerous: bool,
    pub require_dry_run_first: bool,
    pub auto_rollback_on_error: bool,

    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub blocked_paths: Vec<String>,

    pub max_timeout_seconds: u32,
    pub notification_level: NotificationLevel,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub notes: String,
}

/// Lower/upper bound on `max_timeout_seconds`, enforced by [`ProjectPermissions::clamp_timeout`].
pub const MIN_TIMEOUT_SECONDS: u32 = 1;
pub const MAX_TIMEOUT_SECONDS: u32 = 3600;

impl ProjectPermissions {
    /// The "Normal" preset values, used both as the process-wide default and
    /// as the starting point for a newly seen project.
    pub fn normal(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            allow_safe_auto_execute: true,
            allow_moderate_with_approval: true,
            block_dangerous: true,
            require_dry_run_first: false,
            auto_rollback_on_error: true,
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
            max_timeout_seconds: 300,
            notification_level: NotificationLevel::ModerateUp,
            created_at: now,
            updated_at: now,
            notes: String::new(),
        }
    }

    pub fn clamp_timeout(&mut self) {
        self.max_timeout_seconds = self
            .max_timeout_seconds
            .clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS);
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether `command` is denied purely by the project's static allow/block
    /// lists, independent of risk classification. `blocked` beats `allowed`.
    pub fn command_list_decision(&self, command: &str) -> Option<bool> {
        let blocked = self
            .blocked_commands
            .iter()
            .any(|entry| command_list_matches(entry, command));
        let allowed = self
            .allowed_commands
            .iter()
            .any(|entry| command_list_matches(entry, command));
        match (blocked, allowed) {
            (true, _) => Some(false),
            (false, true) => Some(true),
            (false, false) => None,
        }
    }
}

fn command_list_matches(entry: &str, input: &str) -> bool {
    input == entry
        || input
            .strip_prefix(entry)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        || entry
            .strip_prefix(input)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

/// Exactly one row process-wide; used when no project record and no
/// project-local override exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultPermissions(pub ProjectPermissions);

impl Default for DefaultPermissions {
    fn default() -> Self {
        Self(ProjectPermissions::normal(""))
    }
}

/// Named starting points applied by copying preset values into a project
/// record, preserving the project's id and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Strict,
    Normal,
    Permissive,
    Development,
}

impl Preset {
    pub fn apply(self, project_id: &str) -> ProjectPermissions {
        let mut perms = ProjectPermissions::normal(project_id);
        match self {
            Preset::Strict => {
                perms.allow_safe_auto_execute = false;
                perms.allow_moderate_with_approval = true;
                perms.block_dangerous = true;
                perms.require_dry_run_first = true;
                perms.notification_level = NotificationLevel::All;
            }
            Preset::Normal => {
                perms.allow_safe_auto_execute = true;
                perms.allow_moderate_with_approval = true;
                perms.block_dangerous = true;
                perms.notification_level = NotificationLevel::ModerateUp;
            }
            Preset::Permissive => {
                perms.allow_safe_auto_execute = true;
                perms.allow_moderate_with_approval = true;
                perms.block_dangerous = false;
                perms.notification_level = NotificationLevel::DangerousOnly;
            }
            Preset::Development => {
                perms.allow_safe_auto_execute = true;
                perms.allow_moderate_with_approval = true;
                perms.block_dangerous = false;
                perms.notification_level = NotificationLevel::DangerousOnly;
                perms.allowed_commands.extend([
                    "git push*".to_string(),
                    "git reset --hard".to_string(),
                    "git clean -fd".to_string(),
                ]);
            }
        }
        perms
    }
}

/// What kind of check produced an [`AuditEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Execute,
    ModifyPath,
    Classify,
}

/// Append-only permission-decision record. Immutable after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_beats_allowed_in_command_lists() {
        let mut perms = ProjectPermissions::normal("demo");
        perms.allowed_commands.push("npm install".to_string());
        perms.blocked_commands.push("npm install".to_string());
        assert_eq!(perms.command_list_decision("npm install"), Some(false));
    }

    #[test]
    fn development_preset_allowlists_force_push() {
        let perms = Preset::Development.apply("demo");
        assert!(
            perms
                .allowed_commands
                .iter()
                .any(|entry| entry.starts_with("git push"))
        );
    }

    #[test]
    fn timeout_clamps_to_bounds() {
        let mut perms = ProjectPermissions::normal("demo");
        perms.max_timeout_seconds = 999_999;
        perms.clamp_timeout();
        assert_eq!(perms.max_timeout_seconds, MAX_TIMEOUT_SECONDS);

        perms.max_timeout_seconds = 0;
        perms.clamp_timeout();
        assert_eq!(perms.max_timeout_seconds, MIN_TIMEOUT_SECONDS);
    }
}

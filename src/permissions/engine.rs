//! Combined decision engine: classification + static policy -> [`Decision`].
//!
//! Every call to [`PermissionEngine::can_execute`] or
//! [`PermissionEngine::can_modify_path`] appends exactly one [`AuditEntry`],
//! whether the outcome is allow, approval-required, or deny, so the audit log
//! is a complete record of every decision ever made, not just the denials.

use std::path::Path;
use std::time::Instant;

use crate::command_classifier::{self, Classification};
use crate::error::SamResult;
use crate::path_validator::{self, PathValidation};
use crate::risk::RiskLevel;

use super::model::{AuditEntry, AuditKind};
use super::store::{NewAuditEntry, PermissionStore};

/// The three-way outcome of a permission check. `ApprovalRequired` is logged
/// with `allowed = true` — the command was not refused, it is merely pending
/// a human's go-ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AutoExecute { reason: String },
    ApprovalRequired { reason: String },
    Denied { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::AutoExecute { reason }
            | Decision::ApprovalRequired { reason }
            | Decision::Denied { reason } => reason,
        }
    }
}

pub struct PermissionEngine<'a> {
    store: &'a PermissionStore,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(store: &'a PermissionStore) -> Self {
        Self { store }
    }

    /// Decide whether `command` may run for `project_id`. `project_root`, if
    /// given, is used both to resolve a `.sam/permissions.json` override and
    /// (indirectly, via the command classifier) has no effect on path
    /// checks — those are handled separately by `can_modify_path`.
    pub fn can_execute(
        &self,
        project_id: &str,
        command: &str,
        project_root: Option<&Path>,
    ) -> SamResult<(Decision, AuditEntry)> {
        let started = Instant::now();
        let perms = self.store.get(project_id, project_root)?;

        let Classification { risk, reason } =
            command_classifier::classify(command, &perms.allowed_commands, &perms.blocked_commands);

        let list_decision = perms.command_list_decision(command);

        let decision = self.decide(risk, list_decision, &perms, &reason);

        let entry = self.store.record_audit(NewAuditEntry {
            project_id: project_id.to_string(),
            kind: AuditKind::Execute,
            subject: command.to_string(),
            risk_level: risk,
            allowed: decision.is_allowed(),
            reason: decision.reason().to_string(),
            duration_ms: Some(started.elapsed().as_millis() as i64),
            exit_code: None,
            output_preview: None,
        })?;

        if decision.is_allowed() {
            tracing::debug!(project_id, command, risk_level = %risk, "command decision");
        } else {
            tracing::warn!(project_id, command, risk_level = %risk, reason = decision.reason(), "command denied");
        }

        Ok((decision, entry))
    }

    fn decide(
        &self,
        risk: RiskLevel,
        list_decision: Option<bool>,
        perms: &super::model::ProjectPermissions,
        classifier_reason: &str,
    ) -> Decision {
        // A command matching both the project's extra-allowed and
        // extra-blocked sets is denied with the spec's literal reason,
        // passed through unprefixed regardless of the risk level the
        // classifier attached to it.
        if classifier_reason == "blocked wins" {
            return Decision::Denied {
                reason: "blocked wins".to_string(),
            };
        }

        if risk == RiskLevel::Forbidden {
            return Decision::Denied {
                reason: format!("forbidden: {classifier_reason}"),
            };
        }

        // Project allow/block lists are consulted by the classifier for
        // `Safe`/`Forbidden` promotion already; this second check covers the
        // remaining case where a blocked entry matched a command the
        // classifier placed below Forbidden (e.g. a blocked Moderate command).
        if let Some(false) = list_decision {
            return Decision::Denied {
                reason: "blocked wins".to_string(),
            };
        }

        match risk {
            RiskLevel::Safe => {
                if perms.allow_safe_auto_execute {
                    Decision::AutoExecute {
                        reason: classifier_reason.to_string(),
                    }
                } else {
                    Decision::ApprovalRequired {
                        reason: "safe commands require approval under current policy"
                            .to_string(),
                    }
                }
            }
            RiskLevel::Moderate => {
                if perms.allow_moderate_with_approval {
                    Decision::ApprovalRequired {
                        reason: classifier_reason.to_string(),
                    }
                } else {
                    Decision::Denied {
                        reason: "moderate commands are disabled under current policy".to_string(),
                    }
                }
            }
            RiskLevel::Dangerous => {
                if perms.block_dangerous {
                    Decision::Denied {
                        reason: format!("dangerous command blocked by policy: {classifier_reason}"),
                    }
                } else {
                    Decision::ApprovalRequired {
                        reason: format!("dangerous command requires approval: {classifier_reason}"),
                    }
                }
            }
            RiskLevel::Forbidden => unreachable!("handled above"),
        }
    }

    /// Validate a path modification. Always logged at `Moderate` risk,
    /// regardless of outcome, since the path validator itself does not
    /// produce a risk level.
    pub fn can_modify_path(
        &self,
        project_id: &str,
        raw_path: &str,
        project_root: Option<&Path>,
    ) -> SamResult<(Decision, AuditEntry)> {
        let perms = self.store.get(project_id, project_root)?;

        let PathValidation { valid, reason } = path_validator::validate_path(
            raw_path,
            project_root,
            &perms.allowed_paths,
            &perms.blocked_paths,
        );

        let decision = if !valid {
            Decision::Denied { reason: reason.clone() }
        } else if perms.allow_moderate_with_approval {
            Decision::ApprovalRequired { reason: reason.clone() }
        } else {
            Decision::AutoExecute { reason: reason.clone() }
        };

        let entry = self.store.record_audit(NewAuditEntry {
            project_id: project_id.to_string(),
            kind: AuditKind::ModifyPath,
            subject: raw_path.to_string(),
            risk_level: RiskLevel::Moderate,
            allowed: decision.is_allowed(),
            reason: decision.reason().to_string(),
            duration_ms: None,
            exit_code: None,
            output_preview: None,
        })?;

        if !decision.is_allowed() {
            tracing::warn!(project_id, path = raw_path, reason = decision.reason(), "path write denied");
        }

        Ok((decision, entry))
    }
}

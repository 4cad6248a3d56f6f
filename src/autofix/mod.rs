//! Auto-Fix Controller: gates automated fixes behind confidence, rate, and
//! review policy before they are ever applied.

mod controller;
mod model;
mod tracker;

pub use controller::AutoFixController;
pub use model::{
    AutoFixPermissions, AutoFixStats, DetectedIssue, FixResult, FixStatus, IssueStatus,
    RateStatus, SECURITY_ISSUE_TYPES,
};

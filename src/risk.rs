//! Risk classification shared by the command classifier and permission engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Worst plausible effect of a proposed command, totally ordered.
///
/// `Forbidden` is never executable regardless of policy; `Safe` requires no
/// human approval when policy allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Dangerous,
    Forbidden,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Dangerous => "dangerous",
            RiskLevel::Forbidden => "forbidden",
        };
        write!(f, "{s}")
    }
}

/// Governs user-visible alerts only; never gates execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    All,
    ModerateUp,
    DangerousOnly,
    None,
}

impl NotificationLevel {
    /// Whether a decision at `risk` should surface a user-visible alert.
    pub fn should_notify(&self, risk: RiskLevel) -> bool {
        match self {
            NotificationLevel::All => true,
            NotificationLevel::ModerateUp => risk >= RiskLevel::Moderate,
            NotificationLevel::DangerousOnly => risk >= RiskLevel::Dangerous,
            NotificationLevel::None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_order_correctly() {
        assert!(RiskLevel::Safe < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::Dangerous);
        assert!(RiskLevel::Dangerous < RiskLevel::Forbidden);
    }

    #[test]
    fn notification_thresholds() {
        assert!(NotificationLevel::ModerateUp.should_notify(RiskLevel::Moderate));
        assert!(!NotificationLevel::ModerateUp.should_notify(RiskLevel::Safe));
        assert!(NotificationLevel::DangerousOnly.should_notify(RiskLevel::Forbidden));
        assert!(!NotificationLevel::DangerousOnly.should_notify(RiskLevel::Moderate));
        assert!(!NotificationLevel::None.should_notify(RiskLevel::Forbidden));
    }
}

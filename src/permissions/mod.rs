//! Permission Store and Permission Engine: durable per-project policy plus
//! the decision engine that consults it.

mod engine;
mod model;
mod store;

pub use engine::{Decision, PermissionEngine};
pub use model::{
    AuditEntry, AuditKind, DefaultPermissions, Preset, ProjectPermissions, MAX_TIMEOUT_SECONDS,
    MIN_TIMEOUT_SECONDS,
};
pub use store::{NewAuditEntry, PermissionStore};

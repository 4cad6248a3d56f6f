//! Execution Audit Log: append-only execution records with query/export.

mod log;
mod model;

pub use log::ExecutionAuditLog;
pub use model::{CommandType, ExecutionRecord, ExecutionStats, ExecutionStatus};

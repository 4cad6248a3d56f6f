//! Autonomous-action safety core for an AI coding assistant.
//!
//! This crate decides, logs, and can undo every filesystem write and shell
//! command an agent wants to run, independent of the agent loop itself:
//!
//! - [`path_validator`] rejects traversal, null bytes, and writes to
//!   sensitive paths before anything touches disk.
//! - [`command_classifier`] assigns a [`risk::RiskLevel`] to a shell command
//!   line without executing it.
//! - [`permissions`] stores per-project policy (presets, overrides, audit
//!   trail) and turns a classified command or path into a [`permissions::Decision`].
//! - [`checkpoint`] snapshots files before risky operations and can restore
//!   them afterward.
//! - [`audit`] is the append-only record of what actually ran and how it
//!   turned out.
//! - [`autofix`] gates automated lint/format fixes behind confidence, rate
//!   limits, and a per-file failure history.
//!
//! Each store owns its own connection/handle rather than reaching for global
//! state, so an embedding application controls lifetime and location of every
//! database and backup directory explicitly.

pub mod audit;
pub mod autofix;
pub mod checkpoint;
pub mod command_classifier;
mod db;
pub mod error;
pub mod path_validator;
pub mod permissions;
pub mod risk;

pub use error::{SamError, SamResult};
pub use risk::RiskLevel;

/// Install a `RUST_LOG`-driven `tracing` subscriber writing to stderr.
///
/// The core emits `tracing` events at every decision point (see
/// [`permissions`], [`checkpoint`], [`autofix`]) but never installs a
/// subscriber itself, so a library embedded in a larger application doesn't
/// fight over the global default. This is a convenience for binaries and
/// tests that just want to see the events; a no-op if a subscriber is
/// already installed.
pub fn init_tracing() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if let Err(err) = init_result {
        tracing::warn!(error = %err, "tracing already initialized; skipping init_tracing");
    }
}

//! Shared SQLite connection helpers.
//!
//! Every store opens its own `rusqlite::Connection` guarded by a
//! `parking_lot::Mutex`, mirroring the per-store lock used by the original
//! Python implementation (`threading.Lock()` around a fresh `sqlite3.connect`
//! per call). A single `busy_timeout` pragma keeps concurrent writers from
//! two stores sharing one file from failing outright under contention.

use std::path::Path;

use rusqlite::Connection;

use crate::error::SamResult;

pub fn open(path: &Path) -> SamResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Default root for all SAM-managed stores: `<HOME>/.sam`.
pub fn default_sam_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".sam")
}

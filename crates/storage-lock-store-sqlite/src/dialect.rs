// crates/storage-lock-store-sqlite/src/dialect.rs
// ============================================================================
// Module: SQLite Dialect
// Description: Statement text for the SQLite lock table.
// Purpose: Supply placeholders and the server clock query.
// Dependencies: storage-lock-core
// ============================================================================

//! ## Overview
//! `SQLite` numbers its placeholders `?1`, `?2`, .... The server clock is read
//! from `julianday('now')`, converted to unix milliseconds.

use storage_lock_core::SqlDialect;

/// Julian day number of the unix epoch.
const UNIX_EPOCH_JULIAN_DAY: &str = "2440587.5";

/// `SQLite` statement dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn server_time_millis(&self) -> String {
        format!(
            "SELECT CAST((julianday('now') - {UNIX_EPOCH_JULIAN_DAY}) * 86400000.0 AS INTEGER)"
        )
    }
}

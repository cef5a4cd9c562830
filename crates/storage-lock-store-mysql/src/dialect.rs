// crates/storage-lock-store-mysql/src/dialect.rs
// ============================================================================
// Module: MySQL Dialect
// Description: Statement text for the MySQL lock table.
// Purpose: Supply positional placeholders and the server clock query.
// Dependencies: storage-lock-core
// ============================================================================

//! ## Overview
//! MySQL placeholders are positional `?`. The server clock reads `NOW(3)` so
//! the millisecond part survives the conversion to unix milliseconds.

use storage_lock_core::SqlDialect;

/// MySQL statement dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl SqlDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn server_time_millis(&self) -> String {
        "SELECT CAST(UNIX_TIMESTAMP(NOW(3)) * 1000 AS SIGNED)".to_string()
    }
}

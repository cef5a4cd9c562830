// crates/storage-lock-store-postgres/src/dialect.rs
// ============================================================================
// Module: Postgres Dialect
// Description: Statement text for the Postgres lock table.
// Purpose: Supply `$N` placeholders and the server clock query.
// Dependencies: storage-lock-core
// ============================================================================

//! ## Overview
//! Postgres placeholders are `$1`, `$2`, .... The server clock uses
//! `clock_timestamp()`, which advances within a transaction, unlike `now()`.

use storage_lock_core::SqlDialect;

/// Postgres statement dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn server_time_millis(&self) -> String {
        "SELECT (EXTRACT(EPOCH FROM clock_timestamp()) * 1000)::BIGINT".to_string()
    }
}

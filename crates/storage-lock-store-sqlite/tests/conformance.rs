// crates/storage-lock-store-sqlite/tests/conformance.rs
// ============================================================================
// Module: SQLite Conformance Tests
// Description: Shared lock storage conformance suite against SQLite.
// Purpose: Prove the SQLite store honors the version-gate contract.
// ============================================================================

//! Shared lock storage conformance suite against SQLite.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use storage_lock_core::FixedConnectionManager;
use storage_lock_core::LockStorage;
use storage_lock_core::LockStoreOptions;
use storage_lock_core::OpContext;
use storage_lock_core::testkit::check_bootstrap_keeps_schema;
use storage_lock_core::testkit::run_conformance_suite;
use storage_lock_store_sqlite::STORAGE_NAME;
use storage_lock_store_sqlite::SqliteConnectionManager;
use storage_lock_store_sqlite::SqliteConnector;
use storage_lock_store_sqlite::SqliteLockStore;
use tempfile::TempDir;

/// Reads the lock table's column definitions from the `SQLite` catalog.
fn describe_lock_table(path: &Path, table: &str) -> Vec<String> {
    let connection = Connection::open(path).unwrap();
    let mut statement = connection.prepare(&format!("PRAGMA table_info({table})")).unwrap();
    statement
        .query_map([], |row| {
            Ok(format!(
                "{} {} notnull={} pk={}",
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(5)?
            ))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn file_backed_store_passes_conformance() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let manager = SqliteConnectionManager::from_dsn(SqliteConnector::default(), path.display().to_string());
    let ctx = OpContext::background();
    let store = SqliteLockStore::new(&ctx, Arc::new(manager), LockStoreOptions::new()).unwrap();
    assert_eq!(store.name(), STORAGE_NAME);
    run_conformance_suite(&store);
    check_bootstrap_keeps_schema(&store, &|| describe_lock_table(&path, store.table().as_str()));
}

#[test]
fn in_memory_store_passes_conformance() {
    let manager = SqliteConnectionManager::from_dsn(SqliteConnector::default(), ":memory:");
    let ctx = OpContext::background();
    let store = SqliteLockStore::new(&ctx, Arc::new(manager), LockStoreOptions::new()).unwrap();
    run_conformance_suite(&store);
}

#[test]
fn store_over_existing_pool_passes_conformance() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.db");
    let pool = SqliteConnector::default().open(&path.display().to_string()).unwrap();
    let manager = FixedConnectionManager::new("sqlite-fixed-connection-manager", pool);
    let ctx = OpContext::background();
    let options = LockStoreOptions::new().list_page_size(1);
    let store = SqliteLockStore::new(&ctx, Arc::new(manager), options).unwrap();
    run_conformance_suite(&store);
    check_bootstrap_keeps_schema(&store, &|| describe_lock_table(&path, store.table().as_str()));
}

// crates/storage-lock-store-mysql/tests/mysql_store.rs
// ============================================================================
// Module: MySQL Lock Store Tests
// Description: Statement text, connect failures, and live conformance.
// Purpose: Validate the MySQL backend; live checks need a server.
// ============================================================================

//! ## Overview
//! Tests that need a database read `STORAGE_LOCK_MYSQL_DSN` (field form or a
//! `mysql://` URL) and return early when it is unset, so the suite passes on
//! machines without MySQL.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::time::Duration;

use mysql::Conn;
use mysql::Opts;
use mysql::TxOpts;
use mysql::prelude::Queryable;
use storage_lock_core::ConnectionFields;
use storage_lock_core::ConnectionManager;
use storage_lock_core::LockInformation;
use storage_lock_core::LockStorage;
use storage_lock_core::LockStoreOptions;
use storage_lock_core::OpContext;
use storage_lock_core::SqlStatements;
use storage_lock_core::StorageError;
use storage_lock_core::TableName;
use storage_lock_core::Version;
use storage_lock_core::testkit::check_bootstrap_keeps_schema;
use storage_lock_core::testkit::run_conformance_suite;
use storage_lock_core::testkit::unique_lock_id;
use storage_lock_store_mysql::MysqlConnectionManager;
use storage_lock_store_mysql::MysqlConnector;
use storage_lock_store_mysql::MysqlConnectorConfig;
use storage_lock_store_mysql::MysqlDialect;
use storage_lock_store_mysql::MysqlLockStore;
use storage_lock_store_mysql::STORAGE_NAME;
use storage_lock_store_mysql::pool::client_opts;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Environment variable naming a live test database.
const DSN_ENV: &str = "STORAGE_LOCK_MYSQL_DSN";

fn live_dsn() -> Option<String> {
    std::env::var(DSN_ENV).ok().filter(|dsn| !dsn.trim().is_empty())
}

fn live_store(dsn: &str, options: LockStoreOptions) -> MysqlLockStore {
    let manager = MysqlConnectionManager::from_dsn(MysqlConnector::default(), dsn);
    MysqlLockStore::new(&OpContext::background(), Arc::new(manager), options).unwrap()
}

/// Opens a plain driver connection outside the store's pool.
fn side_connection(dsn: &str) -> Conn {
    Conn::new(Opts::from(client_opts(dsn).unwrap())).unwrap()
}

/// Reads the lock table's column definitions from `information_schema`.
fn describe_lock_table(dsn: &str, table: &str) -> Vec<String> {
    let mut conn = side_connection(dsn);
    conn.exec::<(String, String, String), _, _>(
        "SELECT column_name, column_type, is_nullable FROM information_schema.columns WHERE \
         table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position",
        (table,),
    )
    .unwrap()
    .into_iter()
    .map(|(name, column_type, nullable)| format!("{name} {column_type} nullable={nullable}"))
    .collect()
}

// ============================================================================
// SECTION: Offline
// ============================================================================

#[test]
fn statements_use_question_mark_placeholders() {
    let statements = SqlStatements::render(&MysqlDialect, &TableName::parse("locks").unwrap());
    assert_eq!(
        statements.insert,
        "INSERT INTO locks (lock_id, owner_id, version, payload) VALUES (?, ?, ?, ?)"
    );
    assert_eq!(
        statements.update,
        "UPDATE locks SET version = ?, payload = ? WHERE lock_id = ? AND owner_id = ? AND version \
         = ?"
    );
    assert_eq!(statements.select_payload, "SELECT payload FROM locks WHERE lock_id = ?");
    assert!(statements.server_time.contains("UNIX_TIMESTAMP(NOW(3))"));
}

#[test]
fn unreachable_server_fails_once_and_stays_failed() {
    let connector = MysqlConnector::new(MysqlConnectorConfig {
        max_connections: 1,
        connect_timeout_ms: 200,
    })
    .unwrap();
    let fields = ConnectionFields::new("127.0.0.1", 1, "locks", "secret", "locks");
    let manager = Arc::new(MysqlConnectionManager::from_fields(connector, fields));
    let ctx = OpContext::background();
    let first = MysqlLockStore::new(&ctx, Arc::clone(&manager), LockStoreOptions::new());
    let Err(StorageError::Connection(message)) = first else {
        panic!("expected connection error");
    };
    assert!(!message.contains("secret"));
    assert_eq!(manager.take(&ctx).unwrap_err(), StorageError::Connection(message));
    assert!(manager.is_initialized());
}

#[test]
fn invalid_dsn_is_a_connection_error() {
    let manager = MysqlConnectionManager::from_dsn(MysqlConnector::default(), "host=localhost");
    let result = manager.take(&OpContext::background());
    assert!(matches!(result, Err(StorageError::Connection(message)) if message.contains("invalid dsn")));
}

#[test]
fn empty_connection_string_is_a_configuration_error() {
    let manager = MysqlConnectionManager::from_dsn(MysqlConnector::default(), "  ");
    let result = MysqlLockStore::new(&OpContext::background(), Arc::new(manager), LockStoreOptions::new());
    assert!(matches!(result, Err(StorageError::Configuration(_))));
}

#[test]
fn zero_sized_pool_is_rejected() {
    let config = MysqlConnectorConfig {
        max_connections: 0,
        ..MysqlConnectorConfig::default()
    };
    assert!(matches!(MysqlConnector::new(config), Err(StorageError::Configuration(_))));
}

#[test]
fn manager_is_named_after_the_connector() {
    let manager = MysqlConnectionManager::from_dsn(MysqlConnector::default(), "u:p@tcp(h:3306)/d");
    assert_eq!(manager.name(), "mysql-connection-manager");
    assert!(!manager.is_initialized());
}

// ============================================================================
// SECTION: Live
// ============================================================================

#[test]
fn live_store_passes_conformance() {
    let Some(dsn) = live_dsn() else {
        return;
    };
    let store = live_store(&dsn, LockStoreOptions::new().list_page_size(2));
    assert_eq!(store.name(), STORAGE_NAME);
    run_conformance_suite(&store);
    check_bootstrap_keeps_schema(&store, &|| describe_lock_table(&dsn, store.table().as_str()));
}

#[test]
fn live_rewrite_with_identical_values_counts_as_applied() {
    let Some(dsn) = live_dsn() else {
        return;
    };
    let store = live_store(&dsn, LockStoreOptions::new());
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("same-values");
    let info = LockInformation::new("o", "p");
    store.create_with_version(&ctx, &lock_id, Version::new(4), &info).unwrap();
    store.update_with_version(&ctx, &lock_id, Version::new(4), Version::new(4), &info).unwrap();
    assert_eq!(store.get(&ctx, &lock_id).unwrap(), "p");
}

#[test]
fn live_statement_deadline_is_enforced() {
    let Some(dsn) = live_dsn() else {
        return;
    };
    let store = live_store(&dsn, LockStoreOptions::new());
    let lock_id = unique_lock_id("deadline");
    let ctx = OpContext::background();
    let info = LockInformation::new("o", "p");
    store.create_with_version(&ctx, &lock_id, Version::new(1), &info).unwrap();

    let mut blocker = side_connection(&dsn);
    let mut transaction = blocker.start_transaction(TxOpts::default()).unwrap();
    transaction
        .exec_drop("SELECT 1 FROM storage_lock WHERE lock_id = ? FOR UPDATE", (lock_id.as_str(),))
        .unwrap();
    let result = store.update_with_version(
        &ctx.clone().with_timeout(Duration::from_millis(200)),
        &lock_id,
        Version::new(1),
        Version::new(2),
        &info,
    );
    assert_eq!(result, Err(StorageError::DeadlineExceeded));
    transaction.rollback().unwrap();
    store.update_with_version(&ctx, &lock_id, Version::new(1), Version::new(2), &info).unwrap();
}

#[test]
fn live_shutdown_closes_the_pool() {
    let Some(dsn) = live_dsn() else {
        return;
    };
    let store = live_store(&dsn, LockStoreOptions::new());
    let ctx = OpContext::background();
    let pool = store.manager().take(&ctx).unwrap();
    store.manager().shutdown(&ctx).unwrap();
    assert!(pool.is_closed());
    assert!(matches!(store.get(&ctx, "any"), Err(StorageError::Connection(_))));
}

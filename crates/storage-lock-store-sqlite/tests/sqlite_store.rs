// crates/storage-lock-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Lock Store Tests
// Description: Schema, contention, deadlines, and connection lifecycle.
// Purpose: Validate SQLite-specific behavior of the lock store.
// ============================================================================

//! ## Overview
//! Integration tests for the `SQLite` lock store:
//! - Bootstrap creates the expected columns and is idempotent
//! - Racing creates and updates produce exactly one winner
//! - Deadlines bound waits on a database locked by another writer
//! - Field-built and configuration-built stores open the right file
//! - Shutdown closes the pool; connect failures are cached

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use proptest::prelude::*;
use rusqlite::Connection;
use storage_lock_core::CancelToken;
use storage_lock_core::ConnectionFields;
use storage_lock_core::ConnectionManager;
use storage_lock_core::LockInformation;
use storage_lock_core::LockStorage;
use storage_lock_core::LockStoreConfig;
use storage_lock_core::LockStoreOptions;
use storage_lock_core::OpContext;
use storage_lock_core::StorageError;
use storage_lock_core::TableName;
use storage_lock_core::Version;
use storage_lock_store_sqlite::SqliteConnectionManager;
use storage_lock_store_sqlite::SqliteConnector;
use storage_lock_store_sqlite::SqliteConnectorConfig;
use storage_lock_store_sqlite::SqliteLockStore;
use storage_lock_store_sqlite::SqliteStoreMode;
use storage_lock_store_sqlite::SqliteSyncMode;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn ctx() -> OpContext {
    OpContext::background()
}

fn open_store(path: &Path, options: LockStoreOptions) -> SqliteLockStore {
    let manager =
        SqliteConnectionManager::from_dsn(SqliteConnector::default(), path.display().to_string());
    SqliteLockStore::new(&ctx(), Arc::new(manager), options).unwrap()
}

fn open_pooled_store(path: &Path, pool_size: usize) -> Arc<SqliteLockStore> {
    let connector = SqliteConnector::new(SqliteConnectorConfig {
        pool_size,
        ..SqliteConnectorConfig::default()
    })
    .unwrap();
    let manager = SqliteConnectionManager::from_dsn(connector, path.display().to_string());
    Arc::new(SqliteLockStore::new(&ctx(), Arc::new(manager), LockStoreOptions::new()).unwrap())
}

/// Starts an update that blocks on the writer lock held by `blocker`.
fn spawn_blocked_update(store: &Arc<SqliteLockStore>) -> thread::JoinHandle<Result<(), StorageError>> {
    let store = Arc::clone(store);
    let handle = thread::spawn(move || {
        store.update_with_version(&ctx(), "a", Version::new(1), Version::new(2), &info("o", "held"))
    });
    thread::sleep(Duration::from_millis(100));
    handle
}

fn info(owner: &str, payload: &str) -> LockInformation {
    LockInformation::new(owner, payload)
}

// ============================================================================
// SECTION: Schema
// ============================================================================

#[test]
fn bootstrap_creates_lock_columns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let store = open_store(&path, LockStoreOptions::new());
    store.bootstrap(&ctx()).unwrap();

    let connection = Connection::open(&path).unwrap();
    let mut statement = connection.prepare("PRAGMA table_info(storage_lock)").unwrap();
    let columns: Vec<(String, String, bool, bool)> = statement
        .query_map([], |row| {
            Ok((row.get(1)?, row.get(2)?, row.get::<_, i64>(3)? == 1, row.get::<_, i64>(5)? == 1))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        columns,
        vec![
            ("lock_id".to_string(), "VARCHAR(255)".to_string(), true, true),
            ("owner_id".to_string(), "VARCHAR(255)".to_string(), true, false),
            ("version".to_string(), "BIGINT".to_string(), true, false),
            ("payload".to_string(), "TEXT".to_string(), true, false),
        ]
    );
}

#[test]
fn reopening_keeps_existing_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let store = open_store(&path, LockStoreOptions::new());
    store.create_with_version(&ctx(), "job-42", Version::new(4), &info("w", "kept")).unwrap();
    store.manager().shutdown(&ctx()).unwrap();

    let reopened = open_store(&path, LockStoreOptions::new());
    assert_eq!(reopened.get(&ctx(), "job-42").unwrap(), "kept");
}

#[test]
fn custom_tables_are_isolated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let first = open_store(&path, LockStoreOptions::new());
    let second = open_store(
        &path,
        LockStoreOptions::new().table_name(TableName::parse("batch_locks").unwrap()),
    );
    assert_eq!(second.table().as_str(), "batch_locks");
    first.create_with_version(&ctx(), "a", Version::new(1), &info("o", "first")).unwrap();
    second.create_with_version(&ctx(), "a", Version::new(1), &info("o", "second")).unwrap();
    assert_eq!(first.get(&ctx(), "a").unwrap(), "first");
    assert_eq!(second.get(&ctx(), "a").unwrap(), "second");
}

// ============================================================================
// SECTION: Contention
// ============================================================================

#[test]
fn racing_creates_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir.path().join("locks.db"), LockStoreOptions::new()));
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0 .. 8)
        .map(|worker| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.create_with_version(
                    &ctx(),
                    "job-42",
                    Version::new(1),
                    &info(&format!("worker-{worker}"), "claim"),
                )
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(StorageError::VersionMismatch(_))), "{result:?}");
    }
}

#[test]
fn racing_updates_from_one_version_have_one_winner() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir.path().join("locks.db"), LockStoreOptions::new()));
    store.create_with_version(&ctx(), "job-42", Version::new(1), &info("w", "0")).unwrap();
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0 .. 8)
        .map(|worker| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.update_with_version(
                    &ctx(),
                    "job-42",
                    Version::new(1),
                    Version::new(2),
                    &info("w", &worker.to_string()),
                )
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results.iter().filter(|r| matches!(r, Err(StorageError::VersionMismatch(_)))).count(),
        7
    );
}

// ============================================================================
// SECTION: Deadlines
// ============================================================================

#[test]
fn deadline_bounds_wait_on_a_locked_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let store = open_store(&path, LockStoreOptions::new());
    store.create_with_version(&ctx(), "a", Version::new(1), &info("o", "")).unwrap();

    let blocker = Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let started = Instant::now();
    let result = store.update_with_version(
        &ctx().with_timeout(Duration::from_millis(150)),
        "a",
        Version::new(1),
        Version::new(2),
        &info("o", ""),
    );
    assert_eq!(result, Err(StorageError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(4));
    blocker.execute_batch("ROLLBACK;").unwrap();

    store.update_with_version(&ctx(), "a", Version::new(1), Version::new(2), &info("o", "")).unwrap();
}

#[test]
fn deadline_bounds_wait_for_a_busy_pool_connection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let store = open_pooled_store(&path, 1);
    store.create_with_version(&ctx(), "a", Version::new(1), &info("o", "")).unwrap();

    let blocker = Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let holder = spawn_blocked_update(&store);
    let started = Instant::now();
    let result = store.get(&ctx().with_timeout(Duration::from_millis(100)), "a");
    assert_eq!(result, Err(StorageError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(1), "waited {:?}", started.elapsed());
    blocker.execute_batch("ROLLBACK;").unwrap();

    holder.join().unwrap().unwrap();
    assert_eq!(store.get(&ctx(), "a").unwrap(), "held");
}

#[test]
fn idle_connections_serve_calls_while_another_is_blocked() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let store = open_pooled_store(&path, 2);
    store.create_with_version(&ctx(), "a", Version::new(1), &info("o", "first")).unwrap();

    let blocker = Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let holder = spawn_blocked_update(&store);
    let read = store.get(&ctx().with_timeout(Duration::from_millis(500)), "a");
    assert_eq!(read, Ok("first".to_string()));
    blocker.execute_batch("ROLLBACK;").unwrap();
    holder.join().unwrap().unwrap();
}

#[test]
fn store_timeout_applies_when_context_has_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("locks.db");
    let store = open_store(&path, LockStoreOptions::new().default_timeout(Duration::from_millis(100)));
    let blocker = Connection::open(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let result = store.create_with_version(&ctx(), "a", Version::new(1), &info("o", ""));
    assert_eq!(result, Err(StorageError::DeadlineExceeded));
    blocker.execute_batch("ROLLBACK;").unwrap();
}

#[test]
fn cancelled_context_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir.path().join("locks.db"), LockStoreOptions::new());
    let token = CancelToken::new();
    token.cancel();
    let result = store.create_with_version(
        &ctx().with_cancel(token),
        "a",
        Version::new(1),
        &info("o", ""),
    );
    assert_eq!(result, Err(StorageError::Cancelled));
    assert!(matches!(store.get(&ctx(), "a"), Err(StorageError::LockNotFound(_))));
}

// ============================================================================
// SECTION: Connection Sources
// ============================================================================

#[test]
fn field_built_manager_opens_the_named_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("fields.db");
    let fields = ConnectionFields::new("localhost", 0, "", "", path.display().to_string());
    let manager = SqliteConnectionManager::from_fields(SqliteConnector::default(), fields);
    assert_eq!(manager.name(), "sqlite-connection-manager");
    let store = SqliteLockStore::new(&ctx(), Arc::new(manager), LockStoreOptions::new()).unwrap();
    store.create_with_version(&ctx(), "a", Version::new(1), &info("o", "x")).unwrap();
    assert!(path.exists());
    let pool = store.manager().take(&ctx()).unwrap();
    assert_eq!(pool.path(), path.as_path());
}

#[test]
fn open_from_toml_configuration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("configured.db");
    let document = format!(
        "table_name = \"configured_locks\"\nlist_page_size = 2\n\n[connection]\nkind = \
         \"dsn\"\ndsn = \"{}\"\n",
        path.display()
    );
    let config = LockStoreConfig::from_toml_str(&document).unwrap();
    let connector_config: SqliteConnectorConfig =
        toml::from_str("pool_size = 2\njournal_mode = \"delete\"\nsync_mode = \"normal\"").unwrap();
    assert_eq!(connector_config.journal_mode, SqliteStoreMode::Delete);
    assert_eq!(connector_config.sync_mode, SqliteSyncMode::Normal);
    let store = SqliteLockStore::open(&ctx(), &config, connector_config).unwrap();
    assert_eq!(store.table().as_str(), "configured_locks");
    for lock_id in ["c", "a", "e", "b", "d"] {
        store.create_with_version(&ctx(), lock_id, Version::new(1), &info("o", lock_id)).unwrap();
    }
    let ids: Vec<String> =
        store.list(&ctx()).unwrap().map(|record| record.unwrap().lock_id).collect();
    assert_eq!(ids, ["a", "b", "c", "d", "e"]);
    assert_eq!(store.manager().take(&ctx()).unwrap().size(), 2);
}

#[test]
fn empty_connection_string_is_a_configuration_error() {
    let manager = SqliteConnectionManager::from_dsn(SqliteConnector::default(), "");
    let result = SqliteLockStore::new(&ctx(), Arc::new(manager), LockStoreOptions::new());
    assert!(matches!(result, Err(StorageError::Configuration(_))));
}

#[test]
fn invalid_connector_configuration_is_rejected() {
    let config = SqliteConnectorConfig {
        pool_size: 0,
        ..SqliteConnectorConfig::default()
    };
    assert!(matches!(SqliteConnector::new(config), Err(StorageError::Configuration(_))));
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[test]
fn connect_failure_is_cached() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(SqliteConnectionManager::from_dsn(
        SqliteConnector::default(),
        dir.path().display().to_string(),
    ));
    let first = SqliteLockStore::new(&ctx(), Arc::clone(&manager), LockStoreOptions::new());
    let Err(StorageError::Connection(message)) = first else {
        panic!("expected connection error");
    };
    assert!(message.contains("directory"), "{message}");
    assert_eq!(manager.take(&ctx()).unwrap_err(), StorageError::Connection(message));
}

#[test]
fn shutdown_closes_the_pool_and_fails_later_calls() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir.path().join("locks.db"), LockStoreOptions::new());
    let pool = store.manager().take(&ctx()).unwrap();
    store.close(&ctx()).unwrap();
    assert!(!pool.is_closed());
    store.manager().shutdown(&ctx()).unwrap();
    store.manager().shutdown(&ctx()).unwrap();
    assert!(pool.is_closed());
    assert!(matches!(store.get(&ctx(), "a"), Err(StorageError::Connection(_))));
}

#[test]
fn in_memory_pool_uses_one_connection() {
    let pool = SqliteConnector::default().open(":memory:").unwrap();
    assert_eq!(pool.size(), 1);
    pool.close().unwrap();
    pool.close().unwrap();
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn arbitrary_ids_and_payloads_are_stored_exactly(
        lock_id in "\\PC{1,48}",
        payload in "\\PC{0,256}",
    ) {
        let manager = SqliteConnectionManager::from_dsn(SqliteConnector::default(), ":memory:");
        let store = SqliteLockStore::new(&ctx(), Arc::new(manager), LockStoreOptions::new()).unwrap();
        store.create_with_version(&ctx(), &lock_id, Version::new(1), &info("o", &payload)).unwrap();
        prop_assert_eq!(store.get(&ctx(), &lock_id).unwrap(), payload);
    }
}

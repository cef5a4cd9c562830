// crates/storage-lock-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Lock Store
// Description: Version-gated lock storage over a SQLite connection pool.
// Purpose: Wrap the generic SQL store and classify SQLite duplicate keys.
// Dependencies: storage-lock-core, time, tracing
// ============================================================================

//! ## Overview
//! [`SqliteLockStore`] delegates every operation to the generic
//! [`SqlLockStore`]. The one `SQLite`-specific rule is on insert: a primary-key
//! or unique violation means the lock already exists, which callers observe as
//! a version mismatch rather than a driver failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use storage_lock_core::ConnectionManager;
use storage_lock_core::DsnConnectionManager;
use storage_lock_core::LockInformation;
use storage_lock_core::LockRecordStream;
use storage_lock_core::LockStorage;
use storage_lock_core::LockStoreConfig;
use storage_lock_core::LockStoreOptions;
use storage_lock_core::OpContext;
use storage_lock_core::SqlLockStore;
use storage_lock_core::StorageError;
use storage_lock_core::TableName;
use storage_lock_core::Version;
use time::OffsetDateTime;
use tracing::debug;

use crate::dialect::SqliteDialect;
use crate::pool::SqliteConnector;
use crate::pool::SqliteConnectorConfig;
use crate::pool::SqlitePool;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Storage name reported by [`SqliteLockStore`].
pub const STORAGE_NAME: &str = "sqlite-storage";
/// `SQLITE_CONSTRAINT_PRIMARYKEY` extended result code.
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
/// `SQLITE_CONSTRAINT_UNIQUE` extended result code.
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// Connection manager that opens a [`SqlitePool`] from a DSN or fields.
pub type SqliteConnectionManager = DsnConnectionManager<SqliteConnector>;

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed lock store.
///
/// # Invariants
/// - The lock table exists once construction succeeds.
/// - Inserting an existing lock id fails with
///   [`StorageError::VersionMismatch`].
pub struct SqliteLockStore<M = SqliteConnectionManager>
where
    M: ConnectionManager<Handle = SqlitePool>,
{
    /// Generic store doing the statement work.
    inner: SqlLockStore<M>,
}

impl SqliteLockStore {
    /// Opens a store from file configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] for invalid configuration and
    /// [`StorageError::Connection`] when the database cannot be opened.
    pub fn open(
        ctx: &OpContext,
        config: &LockStoreConfig,
        connector_config: SqliteConnectorConfig,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let connector = SqliteConnector::new(connector_config)?;
        let manager = DsnConnectionManager::from_source(connector, config.connection.clone());
        Self::new(ctx, Arc::new(manager), config.options())
    }
}

impl<M> SqliteLockStore<M>
where
    M: ConnectionManager<Handle = SqlitePool>,
{
    /// Builds a store over `manager` and bootstraps the lock table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the connection cannot be obtained or the
    /// table cannot be created.
    pub fn new(
        ctx: &OpContext,
        manager: Arc<M>,
        options: LockStoreOptions,
    ) -> Result<Self, StorageError> {
        let inner = SqlLockStore::new(ctx, manager, &SqliteDialect, options)?;
        Ok(Self {
            inner,
        })
    }

    /// Returns the lock table.
    #[must_use]
    pub const fn table(&self) -> &TableName {
        self.inner.table()
    }

    /// Returns the shared connection manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<M> {
        self.inner.manager()
    }

    /// Returns the generic store this wrapper delegates to.
    #[must_use]
    pub const fn inner(&self) -> &SqlLockStore<M> {
        &self.inner
    }
}

/// Returns true for the driver codes `SQLite` reports on a duplicate key.
fn is_duplicate_key(error: &StorageError) -> bool {
    match error {
        StorageError::Driver(driver) => {
            driver.has_code(SQLITE_CONSTRAINT_PRIMARYKEY) || driver.has_code(SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

impl<M> LockStorage for SqliteLockStore<M>
where
    M: ConnectionManager<Handle = SqlitePool>,
{
    fn name(&self) -> &str {
        STORAGE_NAME
    }

    fn bootstrap(&self, ctx: &OpContext) -> Result<(), StorageError> {
        self.inner.bootstrap(ctx)
    }

    fn create_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        self.inner.create_with_version(ctx, lock_id, version, info).map_err(|err| {
            if is_duplicate_key(&err) {
                debug!(lock_id, %version, "lock insert hit existing row");
                StorageError::VersionMismatch(format!("lock {lock_id} already exists"))
            } else {
                err
            }
        })
    }

    fn update_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        expected_version: Version,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        self.inner.update_with_version(ctx, lock_id, expected_version, new_version, info)
    }

    fn delete_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        expected_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        self.inner.delete_with_version(ctx, lock_id, expected_version, info)
    }

    fn get(&self, ctx: &OpContext, lock_id: &str) -> Result<String, StorageError> {
        self.inner.get(ctx, lock_id)
    }

    fn server_time(&self, ctx: &OpContext) -> Result<OffsetDateTime, StorageError> {
        self.inner.server_time(ctx)
    }

    fn list(&self, ctx: &OpContext) -> Result<LockRecordStream<'_>, StorageError> {
        self.inner.list(ctx)
    }

    fn close(&self, ctx: &OpContext) -> Result<(), StorageError> {
        self.inner.close(ctx)
    }
}

#[cfg(test)]
mod tests {
    use storage_lock_core::DriverError;
    use storage_lock_core::StorageError;

    use super::is_duplicate_key;

    #[test]
    fn primary_key_and_unique_violations_are_duplicates() {
        for code in ["1555", "2067"] {
            let err = StorageError::Driver(DriverError::new(Some(code.to_string()), "constraint"));
            assert!(is_duplicate_key(&err));
        }
    }

    #[test]
    fn other_constraint_failures_are_not_duplicates() {
        let not_null = StorageError::Driver(DriverError::new(Some("1299".to_string()), "not null"));
        assert!(!is_duplicate_key(&not_null));
        assert!(!is_duplicate_key(&StorageError::Connection("down".to_string())));
    }
}

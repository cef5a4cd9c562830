// crates/storage-lock-store-mysql/src/store.rs
// ============================================================================
// Module: MySQL Lock Store
// Description: Version-gated lock storage over a MySQL pool.
// Purpose: Wrap the generic SQL store and classify duplicate-key failures.
// Dependencies: storage-lock-core, time, tracing
// ============================================================================

//! ## Overview
//! [`MysqlLockStore`] delegates to the generic [`SqlLockStore`] and maps
//! server error 1062 (`ER_DUP_ENTRY`) on insert to
//! [`StorageError::VersionMismatch`].

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

use crate::dialect::MysqlDialect;
use crate::pool::MysqlConnector;
use crate::pool::MysqlConnectorConfig;
use crate::pool::MysqlPool;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `ER_DUP_ENTRY`.
const ER_DUP_ENTRY: &str = "1062";

/// Storage name reported by [`MysqlLockStore`].
pub const STORAGE_NAME: &str = "mysql-storage";

/// Connection manager that opens a [`MysqlPool`] from a DSN or fields.
pub type MysqlConnectionManager = DsnConnectionManager<MysqlConnector>;

// ============================================================================
// SECTION: Store
// ============================================================================

/// MySQL-backed lock store.
///
/// # Invariants
/// - The lock table exists once construction succeeds.
/// - Inserting an existing lock id fails with
///   [`StorageError::VersionMismatch`].
pub struct MysqlLockStore<M = MysqlConnectionManager>
where
    M: ConnectionManager<Handle = MysqlPool>,
{
    /// Generic store doing the statement work.
    inner: SqlLockStore<M>,
}

impl MysqlLockStore {
    /// Opens a store from file configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] for invalid configuration and
    /// [`StorageError::Connection`] when the server cannot be reached.
    pub fn open(
        ctx: &OpContext,
        config: &LockStoreConfig,
        connector_config: MysqlConnectorConfig,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let connector = MysqlConnector::new(connector_config)?;
        let manager = DsnConnectionManager::from_source(connector, config.connection.clone());
        Self::new(ctx, Arc::new(manager), config.options())
    }
}

impl<M> MysqlLockStore<M>
where
    M: ConnectionManager<Handle = MysqlPool>,
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
        let inner = SqlLockStore::new(ctx, manager, &MysqlDialect, options)?;
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
}

/// Returns true for a duplicate primary key.
fn is_duplicate_entry(error: &StorageError) -> bool {
    matches!(error, StorageError::Driver(driver) if driver.has_code(ER_DUP_ENTRY))
}

impl<M> LockStorage for MysqlLockStore<M>
where
    M: ConnectionManager<Handle = MysqlPool>,
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
            if is_duplicate_entry(&err) {
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

    use super::is_duplicate_entry;

    #[test]
    fn only_error_1062_is_a_duplicate() {
        let dup = StorageError::Driver(DriverError::new(
            Some("1062".to_string()),
            "Duplicate entry 'job-1' for key 'PRIMARY'",
        ));
        assert!(is_duplicate_entry(&dup));
        let fk = StorageError::Driver(DriverError::new(Some("1452".to_string()), "foreign key"));
        assert!(!is_duplicate_entry(&fk));
        assert!(!is_duplicate_entry(&StorageError::VersionMismatch("x".to_string())));
    }
}

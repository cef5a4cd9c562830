// crates/storage-lock-core/src/sql/store.rs
// ============================================================================
// Module: Generic SQL Lock Store
// Description: Version-gated lock operations over any SQL backend.
// Purpose: Turn lock writes into single conditioned statements and classify
//          their outcomes.
// Dependencies: time, tracing, crate::{config, interfaces, model, sql}
// ============================================================================

//! ## Overview
//! [`SqlLockStore`] issues exactly one statement per lock operation. Update
//! and delete carry the expected version (and owner) in their `WHERE` clause,
//! so the database performs the compare-and-swap; zero affected rows is a
//! version mismatch. Each call borrows the shared handle through a
//! [`ConnectionLease`] that returns it on every exit path, including unwinds.
//!
//! Duplicate-key failures on insert surface here as raw driver errors.
//! Backend wrappers recognize their driver's duplicate-key code and remap it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::LockStoreOptions;
use crate::interfaces::ConnectionManager;
use crate::interfaces::DriverError;
use crate::interfaces::LockRecordStream;
use crate::interfaces::LockStorage;
use crate::interfaces::StorageError;
use crate::model::LockInformation;
use crate::model::LockRecord;
use crate::model::OpContext;
use crate::model::TableName;
use crate::model::Version;
use crate::model::lock::validate_lock_id;
use crate::sql::LockRow;
use crate::sql::SqlConnection;
use crate::sql::SqlDialect;
use crate::sql::SqlParam;
use crate::sql::SqlStatements;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Storage name reported by the generic store.
const STORAGE_NAME: &str = "sql-storage";
/// Nanoseconds per millisecond.
const NANOS_PER_MILLI: i128 = 1_000_000;

// ============================================================================
// SECTION: Connection Lease
// ============================================================================

/// Scoped borrow of the manager's handle.
///
/// # Invariants
/// - The handle is released exactly once: by [`ConnectionLease::finish`], or
///   by `Drop` when the borrowing code unwinds.
struct ConnectionLease<'a, M: ConnectionManager> {
    /// Manager the handle was taken from.
    manager: &'a M,
    /// Context of the borrowing call.
    ctx: &'a OpContext,
    /// Borrowed handle.
    handle: M::Handle,
    /// Set once the handle has been handed back.
    released: bool,
}

impl<'a, M: ConnectionManager> ConnectionLease<'a, M> {
    /// Takes the handle from the manager.
    fn take(manager: &'a M, ctx: &'a OpContext) -> Result<Self, StorageError> {
        let handle = manager.take(ctx)?;
        Ok(Self {
            manager,
            ctx,
            handle,
            released: false,
        })
    }

    /// Releases the handle and reports the release outcome.
    fn finish(mut self) -> Result<(), StorageError> {
        self.released = true;
        self.manager.release(self.ctx, self.handle.clone())
    }
}

impl<M: ConnectionManager> Drop for ConnectionLease<'_, M> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.manager.release(self.ctx, self.handle.clone());
        }
    }
}

/// Combines an operation result with its cleanup result.
///
/// The operation's own error wins. A cleanup error is returned only when the
/// operation succeeded, and is logged when it would otherwise be hidden.
fn prefer_primary<T>(
    primary: Result<T, StorageError>,
    cleanup: Result<(), StorageError>,
) -> Result<T, StorageError> {
    match (primary, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!(error = %err, cleanup_error = %cleanup_err, "connection release failed after operation error");
            Err(err)
        }
    }
}

/// Error for an update or delete whose version gate matched no row.
fn version_gate_error(lock_id: &str, expected: Version, info: &LockInformation) -> StorageError {
    StorageError::VersionMismatch(format!(
        "lock {lock_id} is not held at version {expected} by {}",
        info.owner_id
    ))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Version-gated lock store over a SQL connection manager.
///
/// # Invariants
/// - Statements are rendered once from a validated [`TableName`].
/// - The table exists once construction succeeds.
pub struct SqlLockStore<M: ConnectionManager> {
    /// Shared connection manager.
    manager: Arc<M>,
    /// Rendered statement text.
    statements: SqlStatements,
    /// Store options.
    options: LockStoreOptions,
}

impl<M> SqlLockStore<M>
where
    M: ConnectionManager,
    M::Handle: SqlConnection,
{
    /// Builds a store and bootstraps its table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the connection cannot be obtained or the
    /// table cannot be created.
    pub fn new(
        ctx: &OpContext,
        manager: Arc<M>,
        dialect: &dyn SqlDialect,
        options: LockStoreOptions,
    ) -> Result<Self, StorageError> {
        let statements = SqlStatements::render(dialect, options.table());
        let store = Self {
            manager,
            statements,
            options,
        };
        store.bootstrap(ctx)?;
        Ok(store)
    }

    /// Returns the lock table.
    #[must_use]
    pub const fn table(&self) -> &TableName {
        self.options.table()
    }

    /// Returns the rendered statements.
    #[must_use]
    pub const fn statements(&self) -> &SqlStatements {
        &self.statements
    }

    /// Returns the shared connection manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    /// Applies the store's fallback timeout to a call context.
    fn scoped(&self, ctx: &OpContext) -> OpContext {
        ctx.or_timeout(self.options.timeout())
    }

    /// Runs `op` with a borrowed handle, releasing it on every path.
    fn with_connection<T>(
        &self,
        ctx: &OpContext,
        op: impl FnOnce(&M::Handle) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        ctx.check()?;
        let lease = ConnectionLease::take(self.manager.as_ref(), ctx)?;
        let result = op(&lease.handle);
        let released = lease.finish();
        prefer_primary(result, released)
    }

    /// Fetches one keyset page of rows after `after_lock_id`.
    fn fetch_page(&self, ctx: &OpContext, after_lock_id: &str) -> Result<Vec<LockRow>, StorageError> {
        let limit = i64::try_from(self.options.page_size())
            .map_err(|_| StorageError::Invalid("list page size too large".to_string()))?;
        self.with_connection(ctx, |handle| {
            handle.query_rows(
                ctx,
                &self.statements.select_page,
                &[SqlParam::Text(after_lock_id), SqlParam::BigInt(limit)],
            )
        })
    }
}

impl<M> LockStorage for SqlLockStore<M>
where
    M: ConnectionManager,
    M::Handle: SqlConnection,
{
    fn name(&self) -> &str {
        STORAGE_NAME
    }

    fn bootstrap(&self, ctx: &OpContext) -> Result<(), StorageError> {
        let ctx = self.scoped(ctx);
        self.with_connection(&ctx, |handle| {
            handle.execute(&ctx, &self.statements.create_table, &[])
        })?;
        info!(table = %self.table(), manager = %self.manager.name(), "lock table ready");
        Ok(())
    }

    fn create_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        validate_lock_id(lock_id)?;
        let version_column = version.to_column()?;
        let ctx = self.scoped(ctx);
        self.with_connection(&ctx, |handle| {
            let affected = handle.execute(
                &ctx,
                &self.statements.insert,
                &[
                    SqlParam::Text(lock_id),
                    SqlParam::Text(&info.owner_id),
                    SqlParam::BigInt(version_column),
                    SqlParam::Text(&info.payload),
                ],
            )?;
            if affected == 0 {
                debug!(lock_id, %version, "lock insert affected no rows");
                return Err(StorageError::VersionMismatch(format!("lock {lock_id} already exists")));
            }
            Ok(())
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
        validate_lock_id(lock_id)?;
        let expected_column = expected_version.to_column()?;
        let new_column = new_version.to_column()?;
        let ctx = self.scoped(ctx);
        self.with_connection(&ctx, |handle| {
            let affected = handle.execute(
                &ctx,
                &self.statements.update,
                &[
                    SqlParam::BigInt(new_column),
                    SqlParam::Text(&info.payload),
                    SqlParam::Text(lock_id),
                    SqlParam::Text(&info.owner_id),
                    SqlParam::BigInt(expected_column),
                ],
            )?;
            if affected == 0 {
                debug!(lock_id, owner_id = %info.owner_id, %expected_version, "lock update lost version gate");
                return Err(version_gate_error(lock_id, expected_version, info));
            }
            Ok(())
        })
    }

    fn delete_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        expected_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        validate_lock_id(lock_id)?;
        let expected_column = expected_version.to_column()?;
        let ctx = self.scoped(ctx);
        self.with_connection(&ctx, |handle| {
            let affected = handle.execute(
                &ctx,
                &self.statements.delete,
                &[
                    SqlParam::Text(lock_id),
                    SqlParam::Text(&info.owner_id),
                    SqlParam::BigInt(expected_column),
                ],
            )?;
            if affected == 0 {
                debug!(lock_id, owner_id = %info.owner_id, %expected_version, "lock delete lost version gate");
                return Err(version_gate_error(lock_id, expected_version, info));
            }
            Ok(())
        })
    }

    fn get(&self, ctx: &OpContext, lock_id: &str) -> Result<String, StorageError> {
        validate_lock_id(lock_id)?;
        let ctx = self.scoped(ctx);
        self.with_connection(&ctx, |handle| {
            handle
                .query_text(&ctx, &self.statements.select_payload, &[SqlParam::Text(lock_id)])?
                .ok_or_else(|| StorageError::LockNotFound(lock_id.to_string()))
        })
    }

    fn server_time(&self, ctx: &OpContext) -> Result<OffsetDateTime, StorageError> {
        let ctx = self.scoped(ctx);
        let millis = self.with_connection(&ctx, |handle| {
            handle.query_i64(&ctx, &self.statements.server_time, &[])?.ok_or_else(|| {
                StorageError::Driver(DriverError::message("server time query returned no rows"))
            })
        })?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
            .map_err(|err| StorageError::Invalid(format!("server time out of range: {err}")))
    }

    fn list(&self, ctx: &OpContext) -> Result<LockRecordStream<'_>, StorageError> {
        let ctx = self.scoped(ctx);
        ctx.check()?;
        Ok(Box::new(LockRecordIter::new(self, ctx)))
    }

    fn close(&self, _ctx: &OpContext) -> Result<(), StorageError> {
        debug!(table = %self.table(), "lock store closed");
        Ok(())
    }
}

// ============================================================================
// SECTION: Listing
// ============================================================================

/// Lazy keyset-paged iterator over every lock row.
///
/// # Invariants
/// - Pages are fetched on demand, each under its own scoped connection borrow.
/// - The iterator is one-shot: after exhaustion or an error it yields `None`.
pub struct LockRecordIter<'a, M: ConnectionManager> {
    /// Store being listed.
    store: &'a SqlLockStore<M>,
    /// Context captured when the listing started.
    ctx: OpContext,
    /// Lock id of the last row handed out.
    cursor: String,
    /// Rows fetched but not yet yielded.
    buffer: VecDeque<LockRow>,
    /// Set once the final page has been fetched or a fetch failed.
    exhausted: bool,
}

impl<'a, M> LockRecordIter<'a, M>
where
    M: ConnectionManager,
    M::Handle: SqlConnection,
{
    /// Starts a listing; no query runs until the first `next`.
    fn new(store: &'a SqlLockStore<M>, ctx: OpContext) -> Self {
        Self {
            store,
            ctx,
            cursor: String::new(),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

impl<M> Iterator for LockRecordIter<'_, M>
where
    M: ConnectionManager,
    M::Handle: SqlConnection,
{
    type Item = Result<LockRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.fetch_page(&self.ctx, &self.cursor) {
                Ok(rows) => {
                    if rows.len() < self.store.options.page_size() {
                        self.exhausted = true;
                    }
                    if let Some(last) = rows.last() {
                        self.cursor.clone_from(&last.lock_id);
                    }
                    self.buffer.extend(rows);
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
        let row = self.buffer.pop_front()?;
        Some(Version::from_column(row.version).map(|version| LockRecord {
            lock_id: row.lock_id,
            owner_id: row.owner_id,
            version,
            payload: row.payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::prefer_primary;
    use crate::interfaces::StorageError;

    #[test]
    fn operation_error_wins_over_cleanup_error() {
        let result: Result<(), StorageError> = prefer_primary(
            Err(StorageError::LockNotFound("a".to_string())),
            Err(StorageError::Connection("release".to_string())),
        );
        assert_eq!(result, Err(StorageError::LockNotFound("a".to_string())));
    }

    #[test]
    fn cleanup_error_surfaces_when_operation_succeeded() {
        let result = prefer_primary(Ok(5), Err(StorageError::Connection("release".to_string())));
        assert_eq!(result, Err(StorageError::Connection("release".to_string())));
    }

    #[test]
    fn success_passes_through() {
        assert_eq!(prefer_primary(Ok(5), Ok(())), Ok(5));
        assert_eq!(
            prefer_primary::<()>(Err(StorageError::Cancelled), Ok(())),
            Err(StorageError::Cancelled)
        );
    }
}

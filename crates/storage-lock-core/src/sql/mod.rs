// crates/storage-lock-core/src/sql/mod.rs
// ============================================================================
// Module: SQL Lock Storage
// Description: Statement contracts and the generic version-gated SQL store.
// Purpose: Decide which logical statement each lock operation issues and how
//          its outcome is interpreted, independent of the SQL dialect.
// Dependencies: crate::{interfaces, model}
// ============================================================================

//! ## Overview
//! Backends contribute two pieces:
//! - a [`SqlDialect`] that renders statement text for a validated table, and
//! - a handle implementing [`SqlConnection`] that binds parameters and runs
//!   one statement under an [`OpContext`].
//!
//! [`SqlLockStore`] owns the rest: rendering statements once per store,
//! scoping each connection borrow, mapping zero affected rows to
//! [`StorageError::VersionMismatch`], and paging through the table lazily.
//!
//! Row values are always bound as parameters. Only the validated table name is
//! interpolated into statement text.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod store;

pub use store::LockRecordIter;
pub use store::SqlLockStore;

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::interfaces::StorageError;
use crate::model::OpContext;
use crate::model::TableName;

// ============================================================================
// SECTION: Parameters and Rows
// ============================================================================

/// Statement parameter bound by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlParam<'a> {
    /// Text value.
    Text(&'a str),
    /// 64-bit integer value.
    BigInt(i64),
}

/// Lock row as returned by the driver, before version validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRow {
    /// Lock identifier column.
    pub lock_id: String,
    /// Owner identifier column.
    pub owner_id: String,
    /// Raw version column.
    pub version: i64,
    /// Payload column.
    pub payload: String,
}

// ============================================================================
// SECTION: Dialect
// ============================================================================

/// Statement text generation for one SQL dialect.
///
/// Parameter order is fixed per statement and documented on each method;
/// dialects choose the placeholder syntax.
pub trait SqlDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Creates the lock table if absent.
    fn create_table(&self, table: &TableName) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (lock_id VARCHAR(255) NOT NULL PRIMARY KEY, \
             owner_id VARCHAR(255) NOT NULL, version BIGINT NOT NULL, payload TEXT NOT NULL)"
        )
    }

    /// Inserts a row. Parameters: `lock_id`, `owner_id`, `version`, `payload`.
    fn insert_lock(&self, table: &TableName) -> String {
        format!(
            "INSERT INTO {table} (lock_id, owner_id, version, payload) VALUES ({}, {}, {}, {})",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.placeholder(4)
        )
    }

    /// Version-gated update. Parameters: `new_version`, `payload`, `lock_id`,
    /// `owner_id`, `expected_version`.
    fn update_lock(&self, table: &TableName) -> String {
        format!(
            "UPDATE {table} SET version = {}, payload = {} WHERE lock_id = {} AND owner_id = {} \
             AND version = {}",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3),
            self.placeholder(4),
            self.placeholder(5)
        )
    }

    /// Version-gated delete. Parameters: `lock_id`, `owner_id`,
    /// `expected_version`.
    fn delete_lock(&self, table: &TableName) -> String {
        format!(
            "DELETE FROM {table} WHERE lock_id = {} AND owner_id = {} AND version = {}",
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }

    /// Payload lookup. Parameters: `lock_id`.
    fn select_payload(&self, table: &TableName) -> String {
        format!("SELECT payload FROM {table} WHERE lock_id = {}", self.placeholder(1))
    }

    /// Keyset page of rows. Parameters: `after_lock_id`, `limit`.
    fn select_page(&self, table: &TableName) -> String {
        format!(
            "SELECT lock_id, owner_id, version, payload FROM {table} WHERE lock_id > {} ORDER BY \
             lock_id LIMIT {}",
            self.placeholder(1),
            self.placeholder(2)
        )
    }

    /// Server clock in unix milliseconds. No parameters.
    fn server_time_millis(&self) -> String;
}

/// Statement text rendered once for a dialect and table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatements {
    /// Create-table-if-absent statement.
    pub create_table: String,
    /// Insert statement.
    pub insert: String,
    /// Version-gated update statement.
    pub update: String,
    /// Version-gated delete statement.
    pub delete: String,
    /// Payload lookup statement.
    pub select_payload: String,
    /// Keyset page statement.
    pub select_page: String,
    /// Server clock statement.
    pub server_time: String,
}

impl SqlStatements {
    /// Renders every statement for `table`.
    #[must_use]
    pub fn render(dialect: &dyn SqlDialect, table: &TableName) -> Self {
        Self {
            create_table: dialect.create_table(table),
            insert: dialect.insert_lock(table),
            update: dialect.update_lock(table),
            delete: dialect.delete_lock(table),
            select_payload: dialect.select_payload(table),
            select_page: dialect.select_page(table),
            server_time: dialect.server_time_millis(),
        }
    }
}

// ============================================================================
// SECTION: Connection Contract
// ============================================================================

/// Statement execution on a database handle.
///
/// # Invariants
/// - Implementations honor the context's deadline and cancellation, mapping
///   them to [`StorageError::DeadlineExceeded`] and
///   [`StorageError::Cancelled`].
/// - Other failures surface as [`StorageError::Driver`] carrying the native
///   driver code.
pub trait SqlConnection: Send + Sync {
    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when execution fails.
    fn execute(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<u64, StorageError>;

    /// Returns the first text column of the first row, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the query fails.
    fn query_text(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<String>, StorageError>;

    /// Returns the first integer column of the first row, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the query fails.
    fn query_i64(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<i64>, StorageError>;

    /// Returns all rows of a `lock_id, owner_id, version, payload` query.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the query fails.
    fn query_rows(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Vec<LockRow>, StorageError>;
}

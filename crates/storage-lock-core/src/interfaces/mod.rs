// crates/storage-lock-core/src/interfaces/mod.rs
// ============================================================================
// Module: Storage Lock Interfaces
// Description: Backend-agnostic contracts for lock storage and connections.
// Purpose: Define the surfaces consumed by the lock algorithm and supplied by
//          database backends.
// Dependencies: thiserror, time, crate::model
// ============================================================================

//! ## Overview
//! Three contracts meet here:
//! - [`LockStorage`] is what the distributed lock algorithm drives: bootstrap,
//!   the version-gated writes, reads, listing, and server time.
//! - [`ConnectionManager`] hands out a shared database handle with scoped
//!   take/release calls and closes it on shutdown.
//! - [`Connector`] is the driver-level open/close used by managers that build
//!   their own handle.
//!
//! Every fallible call returns exactly one [`StorageError`] variant. Version
//! conflicts are always [`StorageError::VersionMismatch`]; they are never
//! folded into connection or driver failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use time::OffsetDateTime;

use crate::model::LockInformation;
use crate::model::LockRecord;
use crate::model::OpContext;
use crate::model::Version;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Raw failure reported by a database driver.
///
/// # Invariants
/// - `code` is the driver's native code (`SQLite` extended result code,
///   Postgres SQLSTATE) when the driver reports one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    /// Native driver error code.
    pub code: Option<String>,
    /// Driver error text.
    pub message: String,
}

impl DriverError {
    /// Creates a driver error.
    #[must_use]
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a driver error without a native code.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// Returns true when the native code equals `code`.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Lock storage errors.
///
/// # Invariants
/// - Error messages never embed passwords or lock payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The database handle could not be obtained or initialized.
    #[error("storage connection error: {0}")]
    Connection(String),
    /// A conditioned write affected no row, or an insert hit an existing key.
    #[error("storage version mismatch: {0}")]
    VersionMismatch(String),
    /// No row exists for the requested lock id.
    #[error("storage lock not found: {0}")]
    LockNotFound(String),
    /// The store was configured without a usable connection source or table.
    #[error("storage configuration error: {0}")]
    Configuration(String),
    /// Any other database failure, surfaced unchanged.
    #[error("storage driver error: {0}")]
    Driver(DriverError),
    /// The caller cancelled the operation.
    #[error("storage operation cancelled")]
    Cancelled,
    /// The operation did not finish before the caller's deadline.
    #[error("storage operation deadline exceeded")]
    DeadlineExceeded,
    /// Caller input cannot be represented in the lock table.
    #[error("storage invalid input: {0}")]
    Invalid(String),
}

impl From<DriverError> for StorageError {
    fn from(error: DriverError) -> Self {
        Self::Driver(error)
    }
}

// ============================================================================
// SECTION: Lock Storage
// ============================================================================

/// Lazily evaluated, one-shot sequence of stored lock records.
pub type LockRecordStream<'a> =
    Box<dyn Iterator<Item = Result<LockRecord, StorageError>> + Send + 'a>;

/// Durable, version-gated lock table.
///
/// # Invariants
/// - A successful create moves a lock from absent to held.
/// - Update and delete apply only when the stored version (and owner) match
///   the expectation; otherwise they fail with
///   [`StorageError::VersionMismatch`] and change nothing.
/// - Implementations perform no internal retries and no client-side locking.
pub trait LockStorage: Send + Sync {
    /// Returns a stable storage name for diagnostics.
    fn name(&self) -> &str;

    /// Creates the lock table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the statement fails.
    fn bootstrap(&self, ctx: &OpContext) -> Result<(), StorageError>;

    /// Inserts a new lock row at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VersionMismatch`] when the lock already exists.
    fn create_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError>;

    /// Moves a lock row from `expected_version` to `new_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VersionMismatch`] when the stored version or
    /// owner differs from the expectation.
    fn update_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        expected_version: Version,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError>;

    /// Deletes a lock row held at `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VersionMismatch`] when the stored version or
    /// owner differs from the expectation.
    fn delete_with_version(
        &self,
        ctx: &OpContext,
        lock_id: &str,
        expected_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError>;

    /// Returns the stored payload for a lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockNotFound`] when no row exists.
    fn get(&self, ctx: &OpContext, lock_id: &str) -> Result<String, StorageError>;

    /// Returns the database server's current time.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the clock query fails.
    fn server_time(&self, ctx: &OpContext) -> Result<OffsetDateTime, StorageError>;

    /// Returns every stored lock record as a lazy, one-shot sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the listing cannot be started.
    fn list(&self, ctx: &OpContext) -> Result<LockRecordStream<'_>, StorageError>;

    /// Releases store-level resources.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when resources cannot be released.
    fn close(&self, ctx: &OpContext) -> Result<(), StorageError>;
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Supplies and reclaims a shared database handle.
///
/// # Invariants
/// - Every successful [`ConnectionManager::take`] is paired with a
///   [`ConnectionManager::release`] on all exit paths.
/// - After [`ConnectionManager::shutdown`] the handle is closed and `take`
///   fails.
pub trait ConnectionManager: Send + Sync {
    /// Handle type shared by all callers.
    type Handle: Clone + Send + Sync;

    /// Returns a stable manager name for diagnostics.
    fn name(&self) -> &str;

    /// Returns the shared handle, initializing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] when the handle cannot be
    /// initialized or the manager was shut down.
    fn take(&self, ctx: &OpContext) -> Result<Self::Handle, StorageError>;

    /// Hands a handle back after a scoped use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the handle cannot be returned.
    fn release(&self, ctx: &OpContext, handle: Self::Handle) -> Result<(), StorageError>;

    /// Closes the handle if one was created. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when closing the handle fails.
    fn shutdown(&self, ctx: &OpContext) -> Result<(), StorageError>;
}

/// Driver-level handle construction used by DSN-built managers.
pub trait Connector: Send + Sync {
    /// Handle produced by the driver.
    type Handle: Clone + Send + Sync;

    /// Returns the connector name.
    fn name(&self) -> &'static str;

    /// Opens a handle for the connection string.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the driver cannot connect.
    fn connect(&self, dsn: &str) -> Result<Self::Handle, DriverError>;

    /// Closes a handle produced by [`Connector::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the driver reports a close failure.
    fn close(&self, handle: &Self::Handle) -> Result<(), DriverError>;
}

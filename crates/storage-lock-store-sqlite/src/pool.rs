// crates/storage-lock-store-sqlite/src/pool.rs
// ============================================================================
// Module: SQLite Connection Pool
// Description: Connector and checkout pool of SQLite connections.
// Purpose: Open the lock database with durable pragmas and run single
//          statements under a call's deadline.
// Dependencies: rusqlite, serde, thiserror, storage-lock-core
// ============================================================================

//! ## Overview
//! [`SqliteConnector`] turns a connection string into a [`SqlitePool`]. The
//! string is either a file path (used verbatim), `:memory:`, or the field form
//! `user:password@tcp(host:port)/database`, in which case `database` names the
//! file and the network fields are ignored.
//!
//! Each statement checks out an idle connection, waiting no longer than the
//! call's deadline when all are busy. The connection's busy timeout is clamped to the time remaining before the
//! call's deadline, so a statement blocked on another writer gives up when the
//! deadline passes and reports [`StorageError::DeadlineExceeded`].
//! Security posture: database contents are untrusted; lock ids and payloads
//! are always bound as parameters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::ToSql;
use serde::Deserialize;
use storage_lock_core::ConnectionFields;
use storage_lock_core::Connector;
use storage_lock_core::DriverError;
use storage_lock_core::LockRow;
use storage_lock_core::OpContext;
use storage_lock_core::SqlConnection;
use storage_lock_core::SqlParam;
use storage_lock_core::StorageError;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of pooled connections.
const DEFAULT_POOL_SIZE: usize = 4;
/// Upper bound on pooled connections.
const MAX_POOL_SIZE: usize = 64;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Path naming a private in-memory database.
const MEMORY_PATH: &str = ":memory:";
/// Longest single wait for an idle connection before re-checking the context.
const CHECKOUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` connector.
///
/// # Invariants
/// - `pool_size` is between 1 and 64; in-memory databases always use one
///   connection.
/// - `busy_timeout_ms` is interpreted as milliseconds and is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteConnectorConfig {
    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for SqliteConnectorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl SqliteConnectorConfig {
    /// Checks pool and timeout limits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] on the first violation.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(StorageError::Configuration(format!(
                "pool_size out of range: {} (max {MAX_POOL_SIZE})",
                self.pool_size
            )));
        }
        if self.busy_timeout_ms == 0 {
            return Err(StorageError::Configuration(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default connection pool size.
const fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures while opening the pool.
///
/// # Invariants
/// - Messages never embed connection credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteConnectError {
    /// Filesystem error preparing the database path.
    #[error("sqlite connect io error: {0}")]
    Io(String),
    /// Unusable database path.
    #[error("sqlite connect invalid path: {0}")]
    Invalid(String),
    /// `SQLite` engine error.
    #[error("sqlite connect db error: {message}")]
    Db {
        /// Extended result code, when the engine reported one.
        code: Option<i32>,
        /// Engine message.
        message: String,
    },
}

impl From<rusqlite::Error> for SqliteConnectError {
    fn from(error: rusqlite::Error) -> Self {
        let code = match &error {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
            _ => None,
        };
        Self::Db {
            code,
            message: error.to_string(),
        }
    }
}

impl From<SqliteConnectError> for DriverError {
    fn from(error: SqliteConnectError) -> Self {
        match &error {
            SqliteConnectError::Db {
                code: Some(code),
                ..
            } => Self::new(Some(code.to_string()), error.to_string()),
            _ => Self::message(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Opens [`SqlitePool`] handles from connection strings.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    /// Pool and pragma settings.
    config: SqliteConnectorConfig,
}

impl SqliteConnector {
    /// Builds a connector after validating its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] when the configuration is out of
    /// range.
    pub fn new(config: SqliteConnectorConfig) -> Result<Self, StorageError> {
        config.validate()?;
        Ok(Self {
            config,
        })
    }

    /// Returns the connector configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteConnectorConfig {
        &self.config
    }

    /// Opens a pool for `dsn`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteConnectError`] when the path is unusable or a
    /// connection cannot be opened.
    pub fn open(&self, dsn: &str) -> Result<SqlitePool, SqliteConnectError> {
        let path = resolve_path(dsn);
        let in_memory = path.as_os_str() == MEMORY_PATH;
        if !in_memory {
            validate_store_path(&path)?;
            ensure_parent_dir(&path)?;
        }
        let size = if in_memory { 1 } else { self.config.pool_size };
        let mut connections = Vec::with_capacity(size);
        for _ in 0 .. size {
            connections.push(open_connection(&path, &self.config)?);
        }
        debug!(path = %path.display(), pool_size = size, "sqlite pool opened");
        Ok(SqlitePool {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(connections),
                available: Condvar::new(),
                size,
                closed: AtomicBool::new(false),
                busy_timeout: Duration::from_millis(self.config.busy_timeout_ms),
                path,
            }),
        })
    }
}

impl Connector for SqliteConnector {
    type Handle = SqlitePool;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self, dsn: &str) -> Result<Self::Handle, DriverError> {
        self.open(dsn).map_err(DriverError::from)
    }

    fn close(&self, handle: &Self::Handle) -> Result<(), DriverError> {
        handle.close()
    }
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Shared pool state.
struct PoolInner {
    /// Connections ready for checkout.
    idle: Mutex<Vec<Connection>>,
    /// Signalled when a connection is returned or the pool closes.
    available: Condvar,
    /// Number of connections the pool was opened with.
    size: usize,
    /// Set once the pool has been closed. Only changed under the `idle` lock.
    closed: AtomicBool,
    /// Configured busy timeout.
    busy_timeout: Duration,
    /// Database path.
    path: PathBuf,
}

impl PoolInner {
    /// Locks the idle list. A holder that panicked cannot leave it half
    /// updated, so a poisoned lock is recovered.
    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes back a checked-out connection, closing it if the pool closed
    /// while it was out.
    fn check_in(&self, connection: Connection) {
        let mut idle = self.lock_idle();
        if self.closed.load(Ordering::SeqCst) {
            drop(idle);
            let _ = close_connection(&self.path, connection);
            return;
        }
        idle.push(connection);
        drop(idle);
        self.available.notify_one();
    }
}

/// Connection checked out of the pool; checked back in on drop.
struct PooledConnection<'a> {
    /// Pool the connection belongs to.
    pool: &'a PoolInner,
    /// Checked-out connection; `None` only while dropping.
    connection: Option<Connection>,
}

impl PooledConnection<'_> {
    /// Returns the checked-out connection.
    fn connection(&self) -> Result<&Connection, StorageError> {
        self.connection.as_ref().ok_or_else(closed_error)
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.check_in(connection);
        }
    }
}

/// Cloneable handle to a pool of `SQLite` connections on one database.
///
/// # Invariants
/// - All clones share the same connections; closing one closes them all.
/// - A connection is used by one statement at a time.
#[derive(Clone)]
pub struct SqlitePool {
    /// Shared pool state.
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("path", &self.inner.path)
            .field("size", &self.inner.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SqlitePool {
    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the number of pooled connections.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Returns true once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes every idle connection; connections in use close when their
    /// statement finishes. Later closes are no-ops.
    ///
    /// # Errors
    ///
    /// Returns the first [`DriverError`] reported while closing; remaining
    /// connections are still closed.
    pub fn close(&self) -> Result<(), DriverError> {
        let drained = {
            let mut idle = self.inner.lock_idle();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            std::mem::take(&mut *idle)
        };
        self.inner.available.notify_all();
        let mut first_error = None;
        for connection in drained {
            if let Err(err) = close_connection(&self.inner.path, connection) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Checks out an idle connection, waiting no longer than the call's
    /// deadline allows.
    fn checkout(&self, ctx: &OpContext) -> Result<PooledConnection<'_>, StorageError> {
        let mut idle = self.inner.lock_idle();
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(closed_error());
            }
            if let Some(connection) = idle.pop() {
                return Ok(PooledConnection {
                    pool: &self.inner,
                    connection: Some(connection),
                });
            }
            ctx.check()?;
            let wait = ctx.remaining().map_or(CHECKOUT_POLL_INTERVAL, |remaining| {
                remaining.min(CHECKOUT_POLL_INTERVAL)
            });
            idle = match self.inner.available.wait_timeout(idle, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Runs `op` on a checked-out connection under the call's deadline.
    fn run<T>(
        &self,
        ctx: &OpContext,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        ctx.check()?;
        let pooled = self.checkout(ctx)?;
        let connection = pooled.connection()?;
        ctx.check()?;
        let (busy_timeout, deadline_bound) = match ctx.remaining() {
            Some(remaining) if remaining < self.inner.busy_timeout => (remaining, true),
            _ => (self.inner.busy_timeout, false),
        };
        connection.busy_timeout(busy_timeout).map_err(|err| classify(ctx, deadline_bound, &err))?;
        op(connection).map_err(|err| classify(ctx, deadline_bound, &err))
    }
}

impl SqlConnection for SqlitePool {
    fn execute(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<u64, StorageError> {
        let bound = bind(params);
        let affected = self.run(ctx, |connection| {
            connection.prepare_cached(statement)?.execute(bound.as_slice())
        })?;
        Ok(u64::try_from(affected).unwrap_or(u64::MAX))
    }

    fn query_text(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<String>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |connection| {
            connection
                .prepare_cached(statement)?
                .query_row(bound.as_slice(), |row| row.get::<_, String>(0))
                .optional()
        })
    }

    fn query_i64(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<i64>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |connection| {
            connection
                .prepare_cached(statement)?
                .query_row(bound.as_slice(), |row| row.get::<_, i64>(0))
                .optional()
        })
    }

    fn query_rows(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Vec<LockRow>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |connection| {
            let mut prepared = connection.prepare_cached(statement)?;
            let rows = prepared.query_map(bound.as_slice(), |row| {
                Ok(LockRow {
                    lock_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    version: row.get(2)?,
                    payload: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Borrows statement parameters as `SQLite` bindings.
fn bind<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a dyn ToSql> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Text(value) => value as &dyn ToSql,
            SqlParam::BigInt(value) => value as &dyn ToSql,
        })
        .collect()
}

/// Maps a `SQLite` failure onto the storage error taxonomy.
///
/// A busy or interrupted statement is a cancellation when the token fired, and
/// a deadline failure when its wait was bounded by the deadline. Every other
/// engine failure keeps its extended code.
fn classify(ctx: &OpContext, deadline_bound: bool, error: &rusqlite::Error) -> StorageError {
    match error {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let waited_out = matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted
            );
            if waited_out && ctx.is_cancelled() {
                return StorageError::Cancelled;
            }
            if waited_out && (deadline_bound || ctx.is_expired()) {
                return StorageError::DeadlineExceeded;
            }
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            StorageError::Driver(DriverError::new(Some(failure.extended_code.to_string()), message))
        }
        other => StorageError::Driver(DriverError::message(other.to_string())),
    }
}

/// Error for statements issued after the pool closed.
fn closed_error() -> StorageError {
    StorageError::Connection("sqlite connection pool is closed".to_string())
}

/// Closes one connection, logging a failure.
fn close_connection(path: &Path, connection: Connection) -> Result<(), DriverError> {
    connection.close().map_err(|(_, err)| {
        warn!(path = %path.display(), error = %err, "sqlite connection close failed");
        DriverError::from(SqliteConnectError::from(err))
    })
}

/// Resolves the database path named by a connection string.
fn resolve_path(dsn: &str) -> PathBuf {
    let trimmed = dsn.trim();
    match ConnectionFields::parse_dsn(trimmed) {
        Some(fields) => PathBuf::from(fields.database),
        None => PathBuf::from(trimmed),
    }
}

/// Ensures the parent directory for the database exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteConnectError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteConnectError::Io("database path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteConnectError::Io(err.to_string()))
}

/// Validates database paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteConnectError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteConnectError::Invalid("database path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteConnectError::Invalid("database path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteConnectError::Invalid(
                "database path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteConnectError::Invalid(
            "database path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(
    path: &Path,
    config: &SqliteConnectorConfig,
) -> Result<Connection, SqliteConnectError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(path, flags)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteConnectorConfig,
) -> Result<(), SqliteConnectError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic, reason = "Test assertions panic on unexpected variants.")]

    use std::path::PathBuf;

    use rusqlite::ffi;
    use storage_lock_core::CancelToken;
    use storage_lock_core::OpContext;
    use storage_lock_core::StorageError;

    use super::classify;
    use super::resolve_path;

    /// Builds an engine failure with an extended result code.
    fn failure(extended_code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(extended_code), None)
    }

    fn cancelled() -> OpContext {
        let token = CancelToken::new();
        token.cancel();
        OpContext::background().with_cancel(token)
    }

    #[test]
    fn cancelled_token_keeps_constraint_failures() {
        match classify(&cancelled(), false, &failure(ffi::SQLITE_CONSTRAINT_UNIQUE)) {
            StorageError::Driver(err) => assert!(err.has_code("2067")),
            other => panic!("expected driver error, got {other}"),
        }
    }

    #[test]
    fn busy_failures_follow_the_context() {
        assert_eq!(classify(&cancelled(), false, &failure(ffi::SQLITE_BUSY)), StorageError::Cancelled);
        assert_eq!(
            classify(&OpContext::background(), true, &failure(ffi::SQLITE_BUSY)),
            StorageError::DeadlineExceeded
        );
        assert!(matches!(
            classify(&OpContext::background(), false, &failure(ffi::SQLITE_BUSY)),
            StorageError::Driver(_)
        ));
    }

    #[test]
    fn field_form_names_the_database_file() {
        assert_eq!(
            resolve_path("u:p@tcp(localhost:0)/var/lib/locks.db"),
            PathBuf::from("var/lib/locks.db")
        );
    }

    #[test]
    fn other_strings_are_paths() {
        assert_eq!(resolve_path(" /tmp/locks.db "), PathBuf::from("/tmp/locks.db"));
        assert_eq!(resolve_path(":memory:"), PathBuf::from(":memory:"));
    }
}

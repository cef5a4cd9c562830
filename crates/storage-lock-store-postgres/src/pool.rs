// crates/storage-lock-store-postgres/src/pool.rs
// ============================================================================
// Module: Postgres Connection Pool
// Description: Connector and r2d2 pool handle for Postgres.
// Purpose: Open the lock database and run single statements under a call's
//          deadline.
// Dependencies: postgres, r2d2, r2d2_postgres, serde, thiserror
// ============================================================================

//! ## Overview
//! [`PostgresConnector`] accepts either a libpq-style connection string
//! (`host=... user=...` or `postgres://...`) or the field form
//! `user:password@tcp(host:port)/database`, which it maps onto a
//! [`postgres::Config`].
//!
//! Every statement runs in its own transaction. When the call carries a
//! deadline, the transaction first sets `statement_timeout` to the time
//! remaining, and the pool checkout is bounded by the same remainder. A
//! statement cancelled by that timeout reports
//! [`StorageError::DeadlineExceeded`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use postgres::NoTls;
use postgres::Transaction;
use postgres::error::SqlState;
use postgres::types::ToSql;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
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

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 16;
/// Default connect timeout (ms).
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Pool type used by the connector.
type PgPool = Pool<PostgresConnectionManager<NoTls>>;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the Postgres connector.
///
/// # Invariants
/// - `max_connections` and `connect_timeout_ms` are non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConnectorConfig {
    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connect and checkout timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for PostgresConnectorConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl PostgresConnectorConfig {
    /// Checks pool limits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] on the first violation.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.max_connections == 0 {
            return Err(StorageError::Configuration(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(StorageError::Configuration(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default maximum pool size.
const fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

/// Returns the default connect timeout.
const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures while opening the pool.
///
/// # Invariants
/// - Messages never embed connection passwords.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostgresConnectError {
    /// Connection string could not be parsed.
    #[error("postgres connect invalid dsn: {0}")]
    Config(String),
    /// Pool could not establish its connections.
    #[error("postgres connect failed: {0}")]
    Pool(String),
}

impl From<PostgresConnectError> for DriverError {
    fn from(error: PostgresConnectError) -> Self {
        Self::message(error.to_string())
    }
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Opens [`PostgresPool`] handles from connection strings.
#[derive(Debug, Clone, Default)]
pub struct PostgresConnector {
    /// Pool settings.
    config: PostgresConnectorConfig,
}

impl PostgresConnector {
    /// Builds a connector after validating its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] when the configuration is out of
    /// range.
    pub fn new(config: PostgresConnectorConfig) -> Result<Self, StorageError> {
        config.validate()?;
        Ok(Self {
            config,
        })
    }

    /// Returns the connector configuration.
    #[must_use]
    pub const fn config(&self) -> &PostgresConnectorConfig {
        &self.config
    }

    /// Opens a pool for `dsn`, establishing its first connection.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresConnectError`] when the DSN is invalid or the server
    /// cannot be reached within the connect timeout.
    pub fn open(&self, dsn: &str) -> Result<PostgresPool, PostgresConnectError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut pg_config = client_config(dsn)?;
        pg_config.connect_timeout(connect_timeout);
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(self.config.max_connections)
            .connection_timeout(connect_timeout)
            .build(manager)
            .map_err(|err| PostgresConnectError::Pool(err.to_string()))?;
        Ok(PostgresPool {
            pool: Arc::new(RwLock::new(Some(pool))),
        })
    }
}

impl Connector for PostgresConnector {
    type Handle = PostgresPool;

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn connect(&self, dsn: &str) -> Result<Self::Handle, DriverError> {
        self.open(dsn).map_err(DriverError::from)
    }

    fn close(&self, handle: &Self::Handle) -> Result<(), DriverError> {
        handle.close();
        Ok(())
    }
}

/// Builds the client configuration for a connection string.
///
/// # Errors
///
/// Returns [`PostgresConnectError::Config`] when the string does not parse.
pub fn client_config(dsn: &str) -> Result<postgres::Config, PostgresConnectError> {
    if let Some(fields) = ConnectionFields::parse_dsn(dsn) {
        let mut config = postgres::Config::new();
        config
            .host(&fields.host)
            .port(fields.port)
            .user(&fields.user)
            .password(&fields.password)
            .dbname(&fields.database);
        return Ok(config);
    }
    dsn.parse::<postgres::Config>().map_err(|err| PostgresConnectError::Config(err.to_string()))
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Cloneable handle to an r2d2 Postgres pool.
///
/// # Invariants
/// - All clones share one pool; closing one closes them all.
#[derive(Clone)]
pub struct PostgresPool {
    /// Pool, `None` once closed.
    pool: Arc<RwLock<Option<PgPool>>>,
}

impl std::fmt::Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPool").field("closed", &self.is_closed()).finish()
    }
}

impl PostgresPool {
    /// Returns true once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self.pool.read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// Closes the pool. Idle connections are dropped on a background thread.
    pub fn close(&self) {
        let taken = match self.pool.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = taken {
            debug!("postgres pool closing");
            let _ = std::thread::spawn(move || drop(pool));
        }
    }

    /// Returns a clone of the live pool.
    fn live_pool(&self) -> Result<PgPool, StorageError> {
        let guard = self.pool.read().map_err(|_| {
            StorageError::Driver(DriverError::message("postgres pool lock poisoned"))
        })?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::Connection("postgres connection pool is closed".to_string()))
    }

    /// Runs `op` in a one-statement transaction under the call's deadline.
    fn run<T>(
        &self,
        ctx: &OpContext,
        op: impl FnOnce(&mut Transaction<'_>) -> Result<T, postgres::Error>,
    ) -> Result<T, StorageError> {
        ctx.check()?;
        let pool = self.live_pool()?;
        let remaining = ctx.remaining();
        let checkout = match remaining {
            Some(remaining) => pool.get_timeout(remaining),
            None => pool.get(),
        };
        let mut connection = checkout.map_err(|err| {
            if ctx.is_expired() {
                StorageError::DeadlineExceeded
            } else {
                StorageError::Connection(err.to_string())
            }
        })?;
        ctx.check()?;
        let deadline_bound = remaining.is_some();
        let classify_err = |err: postgres::Error| classify(ctx, deadline_bound, &err);
        let mut transaction = connection.transaction().map_err(classify_err)?;
        if let Some(remaining) = ctx.remaining() {
            let millis = remaining.as_millis().max(1);
            transaction
                .batch_execute(&format!("SET LOCAL statement_timeout = {millis}"))
                .map_err(classify_err)?;
        }
        let value = op(&mut transaction).map_err(classify_err)?;
        transaction.commit().map_err(classify_err)?;
        Ok(value)
    }
}

impl SqlConnection for PostgresPool {
    fn execute(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<u64, StorageError> {
        let bound = bind(params);
        self.run(ctx, |transaction| transaction.execute(statement, &bound))
    }

    fn query_text(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<String>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |transaction| {
            transaction.query_opt(statement, &bound)?.map(|row| row.try_get(0)).transpose()
        })
    }

    fn query_i64(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<i64>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |transaction| {
            transaction.query_opt(statement, &bound)?.map(|row| row.try_get(0)).transpose()
        })
    }

    fn query_rows(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Vec<LockRow>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |transaction| {
            transaction
                .query(statement, &bound)?
                .iter()
                .map(|row| -> Result<LockRow, postgres::Error> {
                    Ok(LockRow {
                        lock_id: row.try_get(0)?,
                        owner_id: row.try_get(1)?,
                        version: row.try_get(2)?,
                        payload: row.try_get(3)?,
                    })
                })
                .collect()
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Borrows statement parameters as Postgres bindings.
fn bind<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Text(value) => value as &(dyn ToSql + Sync),
            SqlParam::BigInt(value) => value as &(dyn ToSql + Sync),
        })
        .collect()
}

/// Maps a Postgres failure onto the storage error taxonomy.
fn classify(ctx: &OpContext, deadline_bound: bool, error: &postgres::Error) -> StorageError {
    match error.code() {
        Some(state) => {
            let message =
                error.as_db_error().map_or_else(|| error.to_string(), |db| db.message().to_string());
            classify_state(ctx, deadline_bound, state, message)
        }
        None if error.is_closed() => StorageError::Connection(error.to_string()),
        None => StorageError::Driver(DriverError::message(error.to_string())),
    }
}

/// Maps a server error by SQLSTATE.
///
/// `query_canceled` is a cancellation when the token fired and a deadline
/// failure under a deadline; other states keep their code.
fn classify_state(
    ctx: &OpContext,
    deadline_bound: bool,
    state: &SqlState,
    message: String,
) -> StorageError {
    if *state == SqlState::QUERY_CANCELED {
        if ctx.is_cancelled() {
            return StorageError::Cancelled;
        }
        if deadline_bound || ctx.is_expired() {
            return StorageError::DeadlineExceeded;
        }
    }
    StorageError::Driver(DriverError::new(Some(state.code().to_string()), message))
}

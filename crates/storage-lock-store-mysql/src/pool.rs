// crates/storage-lock-store-mysql/src/pool.rs
// ============================================================================
// Module: MySQL Connection Pool
// Description: Connector and pool handle for MySQL.
// Purpose: Open the lock database and run single statements under a call's
//          deadline.
// Dependencies: mysql, serde, thiserror, storage-lock-core
// ============================================================================

//! ## Overview
//! [`MysqlConnector`] accepts the field form
//! `user:password@tcp(host:port)/database` (query options after `?` in the
//! database part are ignored) or a `mysql://` URL, and opens a driver pool
//! with at least one live connection.
//!
//! Connections report matched rows rather than changed rows, so a
//! version-gated update that rewrites identical values still counts as
//! applied. Before each statement the session's lock wait and execution time
//! limits are set from the call's deadline; lock waits are bounded in whole
//! seconds, the finest unit `InnoDB` accepts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use mysql::Opts;
use mysql::consts::CapabilityFlags;
use mysql::OptsBuilder;
use mysql::Params;
use mysql::Pool;
use mysql::PoolConstraints;
use mysql::PoolOpts;
use mysql::PooledConn;
use mysql::Value;
use mysql::prelude::Queryable;
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
const DEFAULT_MAX_CONNECTIONS: usize = 16;
/// Default connect timeout (ms).
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
/// URL scheme accepted besides the field form.
const URL_SCHEME: &str = "mysql://";
/// `ER_LOCK_WAIT_TIMEOUT`.
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
/// `ER_QUERY_INTERRUPTED`.
const ER_QUERY_INTERRUPTED: u16 = 1317;
/// `ER_QUERY_TIMEOUT` (`max_execution_time` exceeded).
const ER_QUERY_TIMEOUT: u16 = 3024;
/// Restores server defaults on a connection used without a deadline.
const RESET_SESSION_LIMITS: &str =
    "SET SESSION innodb_lock_wait_timeout = DEFAULT, max_execution_time = DEFAULT";

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the MySQL connector.
///
/// # Invariants
/// - `max_connections` and `connect_timeout_ms` are non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MysqlConnectorConfig {
    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connect and checkout timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for MysqlConnectorConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl MysqlConnectorConfig {
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
const fn default_max_connections() -> usize {
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
pub enum MysqlConnectError {
    /// Connection string is neither the field form nor a `mysql://` URL.
    #[error("mysql connect invalid dsn: {0}")]
    Config(String),
    /// Pool could not establish its first connection.
    #[error("mysql connect failed: {0}")]
    Pool(String),
}

impl From<MysqlConnectError> for DriverError {
    fn from(error: MysqlConnectError) -> Self {
        Self::message(error.to_string())
    }
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Opens [`MysqlPool`] handles from connection strings.
#[derive(Debug, Clone, Default)]
pub struct MysqlConnector {
    /// Pool settings.
    config: MysqlConnectorConfig,
}

impl MysqlConnector {
    /// Builds a connector after validating its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] when the configuration is out of
    /// range.
    pub fn new(config: MysqlConnectorConfig) -> Result<Self, StorageError> {
        config.validate()?;
        Ok(Self {
            config,
        })
    }

    /// Returns the connector configuration.
    #[must_use]
    pub const fn config(&self) -> &MysqlConnectorConfig {
        &self.config
    }

    /// Opens a pool for `dsn`, establishing its first connection.
    ///
    /// # Errors
    ///
    /// Returns [`MysqlConnectError`] when the DSN is invalid or the server
    /// cannot be reached within the connect timeout.
    pub fn open(&self, dsn: &str) -> Result<MysqlPool, MysqlConnectError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let constraints = PoolConstraints::new(1, self.config.max_connections).ok_or_else(|| {
            MysqlConnectError::Config("max_connections must be greater than zero".to_string())
        })?;
        let builder = client_opts(dsn)?
            .tcp_connect_timeout(Some(connect_timeout))
            .additional_capabilities(CapabilityFlags::CLIENT_FOUND_ROWS)
            .pool_opts(PoolOpts::default().with_constraints(constraints));
        let pool =
            Pool::new(builder).map_err(|err| MysqlConnectError::Pool(err.to_string()))?;
        debug!(max_connections = self.config.max_connections, "mysql pool opened");
        Ok(MysqlPool {
            pool: Arc::new(RwLock::new(Some(pool))),
            checkout_timeout: connect_timeout,
        })
    }
}

impl Connector for MysqlConnector {
    type Handle = MysqlPool;

    fn name(&self) -> &'static str {
        "mysql"
    }

    fn connect(&self, dsn: &str) -> Result<Self::Handle, DriverError> {
        self.open(dsn).map_err(DriverError::from)
    }

    fn close(&self, handle: &Self::Handle) -> Result<(), DriverError> {
        handle.close();
        Ok(())
    }
}

/// Builds driver options for a connection string.
///
/// # Errors
///
/// Returns [`MysqlConnectError::Config`] when the string is neither the field
/// form nor a parseable `mysql://` URL.
pub fn client_opts(dsn: &str) -> Result<OptsBuilder, MysqlConnectError> {
    let dsn = dsn.trim();
    if let Some(fields) = ConnectionFields::parse_dsn(dsn) {
        let database = fields.database.split('?').next().unwrap_or_default();
        let builder = OptsBuilder::new()
            .ip_or_hostname(Some(fields.host.as_str()))
            .tcp_port(fields.port)
            .user(Some(fields.user.as_str()))
            .pass(Some(fields.password.as_str()))
            .db_name((!database.is_empty()).then_some(database));
        return Ok(builder);
    }
    if dsn.starts_with(URL_SCHEME) {
        let opts = Opts::from_url(dsn).map_err(|err| MysqlConnectError::Config(err.to_string()))?;
        return Ok(OptsBuilder::from_opts(opts));
    }
    Err(MysqlConnectError::Config(
        "expected user:password@tcp(host:port)/database or a mysql:// url".to_string(),
    ))
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Cloneable handle to a MySQL driver pool.
///
/// # Invariants
/// - All clones share one pool; closing one closes them all.
#[derive(Clone)]
pub struct MysqlPool {
    /// Pool, `None` once closed.
    pool: Arc<RwLock<Option<Pool>>>,
    /// Checkout bound when the call carries no deadline.
    checkout_timeout: Duration,
}

impl std::fmt::Debug for MysqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlPool").field("closed", &self.is_closed()).finish()
    }
}

impl MysqlPool {
    /// Returns true once the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self.pool.read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// Closes the pool. Connections close as the last clone of the driver
    /// pool drops, on a background thread.
    pub fn close(&self) {
        let taken = match self.pool.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = taken {
            debug!("mysql pool closing");
            let _ = std::thread::spawn(move || drop(pool));
        }
    }

    /// Returns a clone of the live pool.
    fn live_pool(&self) -> Result<Pool, StorageError> {
        let guard = self
            .pool
            .read()
            .map_err(|_| StorageError::Driver(DriverError::message("mysql pool lock poisoned")))?;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::Connection("mysql connection pool is closed".to_string()))
    }

    /// Runs `op` on a pooled connection under the call's deadline.
    fn run<T>(
        &self,
        ctx: &OpContext,
        op: impl FnOnce(&mut PooledConn) -> mysql::Result<T>,
    ) -> Result<T, StorageError> {
        ctx.check()?;
        let pool = self.live_pool()?;
        let remaining = ctx.remaining();
        let mut connection =
            pool.try_get_conn(remaining.unwrap_or(self.checkout_timeout)).map_err(|err| {
                if ctx.is_expired() {
                    StorageError::DeadlineExceeded
                } else {
                    StorageError::Connection(err.to_string())
                }
            })?;
        ctx.check()?;
        let deadline_bound = remaining.is_some();
        let limits = ctx.remaining().map_or_else(|| RESET_SESSION_LIMITS.to_string(), session_limits);
        connection.query_drop(limits).map_err(|err| classify(ctx, deadline_bound, &err))?;
        op(&mut connection).map_err(|err| classify(ctx, deadline_bound, &err))
    }
}

impl SqlConnection for MysqlPool {
    fn execute(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<u64, StorageError> {
        let bound = bind(params);
        self.run(ctx, |connection| {
            if matches!(bound, Params::Empty) {
                connection.query_drop(statement)?;
            } else {
                connection.exec_drop(statement, bound)?;
            }
            Ok(connection.affected_rows())
        })
    }

    fn query_text(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<String>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |connection| connection.exec_first::<String, _, _>(statement, bound))
    }

    fn query_i64(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Option<i64>, StorageError> {
        let bound = bind(params);
        self.run(ctx, |connection| connection.exec_first::<i64, _, _>(statement, bound))
    }

    fn query_rows(
        &self,
        ctx: &OpContext,
        statement: &str,
        params: &[SqlParam<'_>],
    ) -> Result<Vec<LockRow>, StorageError> {
        let bound = bind(params);
        let rows = self.run(ctx, |connection| {
            connection.exec::<(String, String, i64, String), _, _>(statement, bound)
        })?;
        Ok(rows
            .into_iter()
            .map(|(lock_id, owner_id, version, payload)| LockRow {
                lock_id,
                owner_id,
                version,
                payload,
            })
            .collect())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts statement parameters to positional driver values.
fn bind(params: &[SqlParam<'_>]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|param| match *param {
                SqlParam::Text(value) => Value::Bytes(value.as_bytes().to_vec()),
                SqlParam::BigInt(value) => Value::Int(value),
            })
            .collect(),
    )
}

/// Session limits for a statement with `remaining` time left.
fn session_limits(remaining: Duration) -> String {
    let lock_wait_secs =
        (remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)).max(1);
    let execution_millis = remaining.as_millis().max(1);
    format!(
        "SET SESSION innodb_lock_wait_timeout = {lock_wait_secs}, max_execution_time = \
         {execution_millis}"
    )
}

/// Maps a MySQL failure onto the storage error taxonomy.
fn classify(ctx: &OpContext, deadline_bound: bool, error: &mysql::Error) -> StorageError {
    match error {
        mysql::Error::MySqlError(server) => {
            classify_code(ctx, deadline_bound, server.code, server.message.clone())
        }
        mysql::Error::IoError(_) => StorageError::Connection(error.to_string()),
        other => StorageError::Driver(DriverError::message(other.to_string())),
    }
}

/// Maps a server error by its numeric code.
///
/// Lock wait timeouts and interrupted or timed-out statements are a
/// cancellation when the token fired and a deadline failure under a deadline;
/// other codes are kept.
fn classify_code(ctx: &OpContext, deadline_bound: bool, code: u16, message: String) -> StorageError {
    let waited_out = matches!(code, ER_LOCK_WAIT_TIMEOUT | ER_QUERY_INTERRUPTED | ER_QUERY_TIMEOUT);
    if waited_out && ctx.is_cancelled() {
        return StorageError::Cancelled;
    }
    if waited_out && (deadline_bound || ctx.is_expired()) {
        return StorageError::DeadlineExceeded;
    }
    StorageError::Driver(DriverError::new(Some(code.to_string()), message))
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::panic,
        reason = "Test assertions use unwrap and panic for clarity."
    )]

    use std::time::Duration;

    use mysql::Opts;
    use storage_lock_core::CancelToken;
    use storage_lock_core::OpContext;
    use storage_lock_core::SqlParam;
    use storage_lock_core::StorageError;

    use super::MysqlConnectError;
    use super::bind;
    use super::classify_code;
    use super::client_opts;
    use super::session_limits;

    #[test]
    fn field_form_maps_onto_driver_options() {
        let opts =
            Opts::from(client_opts("svc:p:w@tcp(db.internal:3307)/locks?parseTime=true").unwrap());
        assert_eq!(opts.get_ip_or_hostname(), "db.internal");
        assert_eq!(opts.get_tcp_port(), 3307);
        assert_eq!(opts.get_user(), Some("svc"));
        assert_eq!(opts.get_pass(), Some("p:w"));
        assert_eq!(opts.get_db_name(), Some("locks"));
    }

    #[test]
    fn urls_are_parsed() {
        let opts = Opts::from(client_opts("mysql://locks:pw@localhost:3306/coordination").unwrap());
        assert_eq!(opts.get_user(), Some("locks"));
        assert_eq!(opts.get_db_name(), Some("coordination"));
    }

    #[test]
    fn other_strings_are_config_errors() {
        assert!(matches!(client_opts("host=localhost"), Err(MysqlConnectError::Config(_))));
    }

    #[test]
    fn session_limits_round_lock_waits_up_to_whole_seconds() {
        assert_eq!(
            session_limits(Duration::from_millis(1_500)),
            "SET SESSION innodb_lock_wait_timeout = 2, max_execution_time = 1500"
        );
        assert_eq!(
            session_limits(Duration::from_micros(10)),
            "SET SESSION innodb_lock_wait_timeout = 1, max_execution_time = 1"
        );
    }

    #[test]
    fn empty_parameter_lists_bind_nothing() {
        assert!(matches!(bind(&[]), mysql::Params::Empty));
        assert!(matches!(
            bind(&[SqlParam::Text("a"), SqlParam::BigInt(7)]),
            mysql::Params::Positional(values) if values.len() == 2
        ));
    }

    #[test]
    fn lock_wait_timeouts_follow_the_context() {
        let token = CancelToken::new();
        token.cancel();
        let cancelled = OpContext::background().with_cancel(token);
        assert_eq!(classify_code(&cancelled, true, 1205, "wait".to_string()), StorageError::Cancelled);
        let bounded = OpContext::background().with_timeout(Duration::from_secs(60));
        assert_eq!(
            classify_code(&bounded, true, 3024, "timeout".to_string()),
            StorageError::DeadlineExceeded
        );
        match classify_code(&cancelled, true, 1062, "Duplicate entry".to_string()) {
            StorageError::Driver(err) => assert!(err.has_code("1062")),
            other => panic!("expected driver error, got {other}"),
        }
    }
}

// crates/storage-lock-core/src/connection.rs
// ============================================================================
// Module: Connection Managers
// Description: Exactly-once handle initialization and shutdown.
// Purpose: Supply the shared database handle used by lock stores.
// Dependencies: tracing, crate::{interfaces, model}
// ============================================================================

//! ## Overview
//! [`DsnConnectionManager`] builds its handle from a connection source the
//! first time it is taken. The connect routine runs at most once per manager
//! instance: concurrent first callers block on the same initialization, and
//! both a handle and a connect failure are cached until shutdown. A failed
//! connect is never retried by a later `take`. A handle whose connect finishes
//! after shutdown has started is closed by the `take` that opened it.
//!
//! [`FixedConnectionManager`] wraps a handle created elsewhere and never
//! closes it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::info;
use tracing::warn;

use crate::interfaces::ConnectionManager;
use crate::interfaces::Connector;
use crate::interfaces::DriverError;
use crate::interfaces::StorageError;
use crate::model::ConnectionFields;
use crate::model::ConnectionSource;
use crate::model::OpContext;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Error returned by managers that were already shut down.
fn shut_down_error(name: &str) -> StorageError {
    StorageError::Connection(format!("{name} has been shut down"))
}

// ============================================================================
// SECTION: DSN Connection Manager
// ============================================================================

/// Connection manager that opens its handle from a DSN or discrete fields.
///
/// # Invariants
/// - The connector's `connect` runs at most once per instance.
/// - The cached outcome (handle or error) is returned by every `take` until
///   shutdown.
pub struct DsnConnectionManager<C: Connector> {
    /// Manager name reported for diagnostics.
    name: String,
    /// Driver used to open and close the handle.
    connector: C,
    /// Connection string source.
    source: ConnectionSource,
    /// Initialize-once slot holding the connect outcome.
    handle: OnceLock<Result<C::Handle, DriverError>>,
    /// Set once shutdown has started.
    shut_down: AtomicBool,
    /// Set once the handle has been handed to the connector's `close`.
    closed: AtomicBool,
}

impl<C: Connector> DsnConnectionManager<C> {
    /// Builds a manager that hands `dsn` to the connector verbatim.
    #[must_use]
    pub fn from_dsn(connector: C, dsn: impl Into<String>) -> Self {
        Self::from_source(
            connector,
            ConnectionSource::Dsn {
                dsn: dsn.into(),
            },
        )
    }

    /// Builds a manager that composes its DSN from discrete fields.
    #[must_use]
    pub fn from_fields(connector: C, fields: ConnectionFields) -> Self {
        Self::from_source(connector, ConnectionSource::Fields(fields))
    }

    /// Builds a manager from any connection source.
    #[must_use]
    pub fn from_source(connector: C, source: ConnectionSource) -> Self {
        Self {
            name: format!("{}-connection-manager", connector.name()),
            connector,
            source,
            handle: OnceLock::new(),
            shut_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the connection string handed to the connector.
    #[must_use]
    pub fn dsn(&self) -> String {
        self.source.to_dsn()
    }

    /// Returns the underlying connector.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns true once a connect attempt has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Runs the connect routine; called at most once through the slot.
    fn connect(&self) -> Result<C::Handle, DriverError> {
        let target = self.source.describe();
        match self.connector.connect(&self.source.to_dsn()) {
            Ok(handle) => {
                info!(manager = %self.name, target = %target, "database handle opened");
                Ok(handle)
            }
            Err(err) => {
                warn!(manager = %self.name, target = %target, error = %err, "database connect failed");
                Err(err)
            }
        }
    }

    /// Closes `handle` through the connector unless it was already closed.
    fn close_once(&self, handle: &C::Handle) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.connector.close(handle) {
            Ok(()) => {
                info!(manager = %self.name, "database handle closed");
                Ok(())
            }
            Err(err) => {
                warn!(manager = %self.name, error = %err, "database handle close failed");
                Err(StorageError::Driver(err))
            }
        }
    }
}

impl<C: Connector> ConnectionManager for DsnConnectionManager<C> {
    type Handle = C::Handle;

    fn name(&self) -> &str {
        &self.name
    }

    fn take(&self, ctx: &OpContext) -> Result<Self::Handle, StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(shut_down_error(&self.name));
        }
        ctx.check()?;
        if self.source.is_empty() {
            return Err(StorageError::Configuration(format!(
                "{} has no connection source",
                self.name
            )));
        }
        let outcome = self.handle.get_or_init(|| self.connect());
        if self.shut_down.load(Ordering::SeqCst) {
            if let Ok(handle) = outcome {
                self.close_once(handle)?;
            }
            return Err(shut_down_error(&self.name));
        }
        match outcome {
            Ok(handle) => Ok(handle.clone()),
            Err(err) => Err(StorageError::Connection(err.to_string())),
        }
    }

    fn release(&self, _ctx: &OpContext, _handle: Self::Handle) -> Result<(), StorageError> {
        Ok(())
    }

    fn shutdown(&self, _ctx: &OpContext) -> Result<(), StorageError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.handle.get() {
            Some(Ok(handle)) => self.close_once(handle),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Fixed Connection Manager
// ============================================================================

/// Connection manager around a handle owned by the caller.
///
/// # Invariants
/// - Shutdown stops handing out the handle but never closes it.
pub struct FixedConnectionManager<H> {
    /// Manager name reported for diagnostics.
    name: String,
    /// Caller-owned handle.
    handle: H,
    /// Set once shutdown has been requested.
    shut_down: AtomicBool,
}

impl<H: Clone + Send + Sync> FixedConnectionManager<H> {
    /// Wraps an existing handle.
    #[must_use]
    pub fn new(name: impl Into<String>, handle: H) -> Self {
        Self {
            name: name.into(),
            handle,
            shut_down: AtomicBool::new(false),
        }
    }
}

impl<H: Clone + Send + Sync> ConnectionManager for FixedConnectionManager<H> {
    type Handle = H;

    fn name(&self) -> &str {
        &self.name
    }

    fn take(&self, ctx: &OpContext) -> Result<Self::Handle, StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(shut_down_error(&self.name));
        }
        ctx.check()?;
        Ok(self.handle.clone())
    }

    fn release(&self, _ctx: &OpContext, _handle: Self::Handle) -> Result<(), StorageError> {
        Ok(())
    }

    fn shutdown(&self, _ctx: &OpContext) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

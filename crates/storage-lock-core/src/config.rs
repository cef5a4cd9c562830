// crates/storage-lock-core/src/config.rs
// ============================================================================
// Module: Lock Store Configuration
// Description: Deserializable store configuration and builder-style options.
// Purpose: Validate table names and connection sources before a store opens.
// Dependencies: serde, toml, crate::{interfaces, model}
// ============================================================================

//! ## Overview
//! [`LockStoreConfig`] is the file-facing configuration (TOML or any serde
//! format). [`LockStoreOptions`] is the validated subset a store consumes.
//! Validation happens here, once, so stores can interpolate the table name
//! into statement text without rechecking it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::interfaces::StorageError;
use crate::model::ConnectionSource;
use crate::model::TableName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of rows fetched per listing page.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 128;
/// Upper bound on rows fetched per listing page.
const MAX_LIST_PAGE_SIZE: usize = 10_000;

/// Returns the default listing page size.
const fn default_list_page_size() -> usize {
    DEFAULT_LIST_PAGE_SIZE
}

// ============================================================================
// SECTION: Store Options
// ============================================================================

/// Options consumed by a lock store at construction.
///
/// # Invariants
/// - `list_page_size` is between 1 and 10 000.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStoreOptions {
    /// Lock table name.
    table_name: TableName,
    /// Rows fetched per listing page.
    list_page_size: usize,
    /// Timeout applied to calls whose context carries no deadline.
    default_timeout: Option<Duration>,
}

impl Default for LockStoreOptions {
    fn default() -> Self {
        Self {
            table_name: TableName::default(),
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            default_timeout: None,
        }
    }
}

impl LockStoreOptions {
    /// Returns default options (default table, default page size, no timeout).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock table.
    #[must_use]
    pub fn table_name(mut self, table_name: TableName) -> Self {
        self.table_name = table_name;
        self
    }

    /// Sets the listing page size. Values outside 1..=10 000 are clamped.
    #[must_use]
    pub fn list_page_size(mut self, list_page_size: usize) -> Self {
        self.list_page_size = list_page_size.clamp(1, MAX_LIST_PAGE_SIZE);
        self
    }

    /// Sets the timeout applied when a call's context has no deadline.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Returns the lock table.
    #[must_use]
    pub const fn table(&self) -> &TableName {
        &self.table_name
    }

    /// Returns the listing page size.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.list_page_size
    }

    /// Returns the fallback timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
}

// ============================================================================
// SECTION: File Configuration
// ============================================================================

/// Lock store configuration as loaded from a file.
///
/// # Invariants
/// - `table_name` is validated during deserialization.
/// - `connection` must produce a non-empty connection string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LockStoreConfig {
    /// Lock table name.
    #[serde(default)]
    pub table_name: TableName,
    /// Connection string source.
    pub connection: ConnectionSource,
    /// Rows fetched per listing page.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// Timeout in milliseconds applied when a call has no deadline.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

impl LockStoreConfig {
    /// Builds a configuration with defaults for everything but the source.
    #[must_use]
    pub fn new(connection: ConnectionSource) -> Self {
        Self {
            table_name: TableName::default(),
            connection,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            default_timeout_ms: None,
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] when the document does not
    /// parse or fails validation.
    pub fn from_toml_str(input: &str) -> Result<Self, StorageError> {
        let config: Self =
            toml::from_str(input).map_err(|err| StorageError::Configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for a usable connection source and limits.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] on the first violation.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.connection.is_empty() {
            return Err(StorageError::Configuration(
                "connection source must name a dsn or host/database".to_string(),
            ));
        }
        if self.list_page_size == 0 || self.list_page_size > MAX_LIST_PAGE_SIZE {
            return Err(StorageError::Configuration(format!(
                "list_page_size out of range: {} (max {MAX_LIST_PAGE_SIZE})",
                self.list_page_size
            )));
        }
        if self.default_timeout_ms == Some(0) {
            return Err(StorageError::Configuration(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the store options described by this configuration.
    #[must_use]
    pub fn options(&self) -> LockStoreOptions {
        let options = LockStoreOptions::new()
            .table_name(self.table_name.clone())
            .list_page_size(self.list_page_size);
        match self.default_timeout_ms {
            Some(ms) => options.default_timeout(Duration::from_millis(ms)),
            None => options,
        }
    }
}

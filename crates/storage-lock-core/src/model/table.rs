// crates/storage-lock-core/src/model/table.rs
// ============================================================================
// Module: Lock Table Names
// Description: Validated SQL identifiers for the lock table.
// Purpose: Allow table names to be interpolated into statement text safely.
// Dependencies: serde, crate::interfaces
// ============================================================================

//! ## Overview
//! Table names cannot be bound as statement parameters, so they are rendered
//! into statement text once per store. [`TableName`] restricts them to plain
//! identifiers (optionally schema-qualified) at configuration time, which
//! rules out injection through the table name.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::interfaces::StorageError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Table used when the configuration names none.
pub const DEFAULT_TABLE_NAME: &str = "storage_lock";
/// Maximum length of a single identifier part.
const MAX_IDENTIFIER_LENGTH: usize = 64;

// ============================================================================
// SECTION: Table Name
// ============================================================================

/// Allow-listed lock table name.
///
/// # Invariants
/// - One identifier, or a `schema.table` pair of identifiers.
/// - Each identifier matches `[A-Za-z_][A-Za-z0-9_]*` and is at most 64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Validates and wraps a table name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] when the name is not a plain
    /// (optionally schema-qualified) identifier.
    pub fn parse(name: &str) -> Result<Self, StorageError> {
        let mut parts = name.split('.');
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            return Err(StorageError::Configuration(format!(
                "table name '{name}' has more than one schema qualifier"
            )));
        }
        validate_identifier(name, first)?;
        if let Some(table) = second {
            validate_identifier(name, table)?;
        }
        Ok(Self(name.to_string()))
    }

    /// Returns the table name as written into statements.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self(DEFAULT_TABLE_NAME.to_string())
    }
}

impl FromStr for TableName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks one identifier part against the allow-list.
fn validate_identifier(full: &str, part: &str) -> Result<(), StorageError> {
    if part.is_empty() {
        return Err(StorageError::Configuration(format!(
            "table name '{full}' contains an empty identifier"
        )));
    }
    if part.len() > MAX_IDENTIFIER_LENGTH {
        return Err(StorageError::Configuration(format!(
            "table name '{full}' has an identifier longer than {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }
    let mut chars = part.chars();
    let leading_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !leading_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StorageError::Configuration(format!(
            "table name '{full}' must use only ASCII letters, digits, and underscores"
        )));
    }
    Ok(())
}

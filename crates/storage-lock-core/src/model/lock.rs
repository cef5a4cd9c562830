// crates/storage-lock-core/src/model/lock.rs
// ============================================================================
// Module: Lock Rows
// Description: Lock versions, write payloads, and stored lock records.
// Purpose: Provide strongly typed values for version-gated lock writes.
// Dependencies: serde, crate::interfaces
// ============================================================================

//! ## Overview
//! A lock row is identified by its lock id and carries the owner that last
//! wrote it, a monotonically advancing version, and an opaque payload. The
//! payload is serialized lock metadata; stores persist it verbatim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::interfaces::StorageError;

// ============================================================================
// SECTION: Version
// ============================================================================

/// Lock row version used as the compare-and-swap token.
///
/// # Invariants
/// - Persisted as a signed 64-bit `BIGINT`; values above `i64::MAX` are
///   rejected before reaching the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Creates a version from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following version, or `None` on overflow.
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Converts the version into its column representation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Invalid`] when the version does not fit a
    /// signed 64-bit column.
    pub fn to_column(self) -> Result<i64, StorageError> {
        i64::try_from(self.0).map_err(|_| {
            StorageError::Invalid(format!("version {} exceeds the BIGINT column range", self.0))
        })
    }

    /// Builds a version from a stored column value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Invalid`] when the stored value is negative.
    pub fn from_column(value: i64) -> Result<Self, StorageError> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| StorageError::Invalid(format!("stored version {value} is negative")))
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Write Payload
// ============================================================================

/// Owner and serialized metadata supplied with every lock write.
///
/// # Invariants
/// - `payload` is opaque to stores and round-trips byte-for-byte.
/// - `owner_id` participates in update and delete predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInformation {
    /// Identifier of the holder issuing the write.
    pub owner_id: String,
    /// Serialized lock metadata.
    pub payload: String,
}

impl LockInformation {
    /// Creates a lock write payload.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            payload: payload.into(),
        }
    }
}

// ============================================================================
// SECTION: Stored Record
// ============================================================================

/// A lock row as read back from the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Holder that last wrote the row.
    pub owner_id: String,
    /// Current row version.
    pub version: Version,
    /// Serialized lock metadata.
    pub payload: String,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Rejects lock identifiers that cannot name a row.
///
/// # Errors
///
/// Returns [`StorageError::Invalid`] for empty identifiers.
pub fn validate_lock_id(lock_id: &str) -> Result<(), StorageError> {
    if lock_id.is_empty() {
        return Err(StorageError::Invalid("lock_id must not be empty".to_string()));
    }
    Ok(())
}

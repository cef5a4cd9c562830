// crates/storage-lock-core/src/lib.rs
// ============================================================================
// Module: Storage Lock Core Library
// Description: Public API surface for the storage lock core.
// Purpose: Expose lock types, storage interfaces, connection managers, and the
//          generic version-gated SQL store.
// Dependencies: crate::{model, interfaces, connection, sql, config}
// ============================================================================

//! ## Overview
//! Storage lock core provides the durable half of a distributed mutual
//! exclusion lock: a table of lock rows whose writes are gated on an expected
//! version number. The database performs the compare-and-swap through a single
//! conditioned statement; this crate decides which statement to issue and how
//! to interpret its outcome.
//!
//! Backends plug in through [`Connector`] (opening a driver handle),
//! [`SqlConnection`] (executing statements on that handle), and [`SqlDialect`]
//! (statement text). The lock algorithm that drives acquire/renew/release is a
//! caller concern and is not part of this crate.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod connection;
pub mod interfaces;
pub mod model;
pub mod sql;
#[cfg(feature = "testkit")]
pub mod testkit;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use model::*;

pub use config::DEFAULT_LIST_PAGE_SIZE;
pub use config::LockStoreConfig;
pub use config::LockStoreOptions;
pub use connection::DsnConnectionManager;
pub use connection::FixedConnectionManager;
pub use interfaces::ConnectionManager;
pub use interfaces::Connector;
pub use interfaces::DriverError;
pub use interfaces::LockRecordStream;
pub use interfaces::LockStorage;
pub use interfaces::StorageError;
pub use sql::LockRow;
pub use sql::SqlConnection;
pub use sql::SqlDialect;
pub use sql::SqlLockStore;
pub use sql::SqlParam;
pub use sql::SqlStatements;

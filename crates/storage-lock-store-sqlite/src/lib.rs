// crates/storage-lock-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Lock Storage
// Description: Version-gated lock storage backend using SQLite.
// Purpose: Provide an embedded, file-backed lock table for single-host
//          coordination and for exercising the lock protocol without a server.
// Dependencies: rusqlite, storage-lock-core
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`LockStorage`] built on the generic
//! SQL store from `storage-lock-core`:
//! - [`SqliteConnector`] opens a small round-robin pool of connections with
//!   WAL journaling and a busy timeout.
//! - [`SqliteDialect`] renders the lock statements with `?N` placeholders.
//! - [`SqliteLockStore`] remaps primary-key violations on insert to version
//!   mismatches.
//!
//! [`LockStorage`]: storage_lock_core::LockStorage

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod dialect;
pub mod pool;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use dialect::SqliteDialect;
pub use pool::SqliteConnectError;
pub use pool::SqliteConnector;
pub use pool::SqliteConnectorConfig;
pub use pool::SqlitePool;
pub use pool::SqliteStoreMode;
pub use pool::SqliteSyncMode;
pub use store::STORAGE_NAME;
pub use store::SqliteConnectionManager;
pub use store::SqliteLockStore;

// crates/storage-lock-store-mysql/src/lib.rs
// ============================================================================
// Module: MySQL Lock Storage
// Description: Version-gated lock storage backend using MySQL.
// Purpose: Provide a shared lock table for coordination across hosts.
// Dependencies: mysql, storage-lock-core
// ============================================================================

//! ## Overview
//! This crate provides a MySQL-backed [`LockStorage`] built on the generic
//! SQL store from `storage-lock-core`. [`MysqlConnector`] understands the
//! field-form DSN `user:password@tcp(host:port)/database` as well as
//! `mysql://` URLs, and opens a connection pool. [`MysqlLockStore`] remaps
//! `ER_DUP_ENTRY` (1062) on insert to a version mismatch.
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

pub use dialect::MysqlDialect;
pub use pool::MysqlConnectError;
pub use pool::MysqlConnector;
pub use pool::MysqlConnectorConfig;
pub use pool::MysqlPool;
pub use store::MysqlConnectionManager;
pub use store::MysqlLockStore;
pub use store::STORAGE_NAME;

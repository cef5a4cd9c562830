// crates/storage-lock-store-postgres/src/lib.rs
// ============================================================================
// Module: Postgres Lock Storage
// Description: Version-gated lock storage backend using Postgres.
// Purpose: Provide a shared lock table for coordination across hosts.
// Dependencies: postgres, r2d2, storage-lock-core
// ============================================================================

//! ## Overview
//! This crate provides a Postgres-backed [`LockStorage`] built on the generic
//! SQL store from `storage-lock-core`. [`PostgresConnector`] opens an r2d2
//! pool; each statement runs in its own short transaction so a call's deadline
//! can be applied with `SET LOCAL statement_timeout`. [`PostgresLockStore`]
//! remaps `unique_violation` on insert to a version mismatch.
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

pub use dialect::PostgresDialect;
pub use pool::PostgresConnectError;
pub use pool::PostgresConnector;
pub use pool::PostgresConnectorConfig;
pub use pool::PostgresPool;
pub use store::PostgresConnectionManager;
pub use store::PostgresLockStore;
pub use store::STORAGE_NAME;

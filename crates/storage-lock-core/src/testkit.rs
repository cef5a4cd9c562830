// crates/storage-lock-core/src/testkit.rs
// ============================================================================
// Module: Lock Storage Conformance Kit
// Description: Reusable behavioral checks for any LockStorage backend.
// Purpose: Let every backend run the same version-gate conformance suite.
// Dependencies: crate::{interfaces, model}
// ============================================================================

//! ## Overview
//! Backends call [`run_conformance_suite`] from their integration tests with a
//! freshly constructed store. Each check uses its own unique lock ids so the
//! suite can run against a shared database. Checks assert and panic on
//! failure, like any test helper.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::use_debug,
    reason = "Conformance checks are test helpers and report failures by panicking."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::interfaces::LockStorage;
use crate::interfaces::StorageError;
use crate::model::LockInformation;
use crate::model::OpContext;
use crate::model::Version;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Per-process counter distinguishing generated lock ids.
static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Returns a lock id unique to this process and call.
#[must_use]
pub fn unique_lock_id(prefix: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());
    let sequence = LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{nanos}-{sequence}", std::process::id())
}

// ============================================================================
// SECTION: Checks
// ============================================================================

/// A second create for an existing lock fails with a version mismatch,
/// whatever version it names.
pub fn check_create_conflict(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("create-conflict");
    storage
        .create_with_version(&ctx, &lock_id, Version::new(1), &LockInformation::new("a", "{}"))
        .expect("first create");
    for version in [1, 2, 99] {
        let result = storage.create_with_version(
            &ctx,
            &lock_id,
            Version::new(version),
            &LockInformation::new("b", "{}"),
        );
        assert!(
            matches!(result, Err(StorageError::VersionMismatch(_))),
            "duplicate create at version {version} returned {result:?}"
        );
    }
    assert_eq!(storage.get(&ctx, &lock_id).expect("get"), "{}");
}

/// An update applies once per expected version; a stale repeat is rejected.
pub fn check_update_gate(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("update-gate");
    let owner = "owner-a";
    storage
        .create_with_version(&ctx, &lock_id, Version::new(1), &LockInformation::new(owner, "v1"))
        .expect("create");
    storage
        .update_with_version(
            &ctx,
            &lock_id,
            Version::new(1),
            Version::new(2),
            &LockInformation::new(owner, "v2"),
        )
        .expect("update from 1 to 2");
    let stale = storage.update_with_version(
        &ctx,
        &lock_id,
        Version::new(1),
        Version::new(2),
        &LockInformation::new(owner, "stale"),
    );
    assert!(matches!(stale, Err(StorageError::VersionMismatch(_))), "stale update: {stale:?}");
    assert_eq!(storage.get(&ctx, &lock_id).expect("get"), "v2");
}

/// A stale delete leaves the row; a matching delete removes it.
pub fn check_delete_gate(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("delete-gate");
    let info = LockInformation::new("owner-a", "held");
    storage.create_with_version(&ctx, &lock_id, Version::new(3), &info).expect("create");
    let stale = storage.delete_with_version(&ctx, &lock_id, Version::new(2), &info);
    assert!(matches!(stale, Err(StorageError::VersionMismatch(_))), "stale delete: {stale:?}");
    assert_eq!(storage.get(&ctx, &lock_id).expect("row survives"), "held");
    storage.delete_with_version(&ctx, &lock_id, Version::new(3), &info).expect("delete");
    let missing = storage.get(&ctx, &lock_id);
    assert!(matches!(missing, Err(StorageError::LockNotFound(_))), "get after delete: {missing:?}");
}

/// Payloads come back exactly as written.
pub fn check_round_trip(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("round-trip");
    let payload = "{\"a\":1}";
    storage
        .create_with_version(&ctx, &lock_id, Version::new(1), &LockInformation::new("o", payload))
        .expect("create");
    assert_eq!(storage.get(&ctx, &lock_id).expect("get"), payload);
}

/// Two workers contend for one lock; only the holder's writes apply.
pub fn check_end_to_end(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("job-42");
    let worker_a = |payload: &str| LockInformation::new("worker-a", payload);
    storage.create_with_version(&ctx, &lock_id, Version::new(1), &worker_a("1")).expect("create");
    storage
        .update_with_version(&ctx, &lock_id, Version::new(1), Version::new(2), &worker_a("2"))
        .expect("renew");
    let contender = storage.update_with_version(
        &ctx,
        &lock_id,
        Version::new(1),
        Version::new(2),
        &LockInformation::new("worker-b", "b"),
    );
    assert!(
        matches!(contender, Err(StorageError::VersionMismatch(_))),
        "contender update: {contender:?}"
    );
    storage.delete_with_version(&ctx, &lock_id, Version::new(2), &worker_a("2")).expect("release");
    let missing = storage.get(&ctx, &lock_id);
    assert!(matches!(missing, Err(StorageError::LockNotFound(_))), "get after release: {missing:?}");
}

/// Owner tracking: a matching version from another owner is rejected.
pub fn check_owner_gate(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("owner-gate");
    storage
        .create_with_version(&ctx, &lock_id, Version::new(1), &LockInformation::new("a", "a"))
        .expect("create");
    let foreign = LockInformation::new("b", "b");
    let update =
        storage.update_with_version(&ctx, &lock_id, Version::new(1), Version::new(2), &foreign);
    assert!(matches!(update, Err(StorageError::VersionMismatch(_))), "foreign update: {update:?}");
    let delete = storage.delete_with_version(&ctx, &lock_id, Version::new(1), &foreign);
    assert!(matches!(delete, Err(StorageError::VersionMismatch(_))), "foreign delete: {delete:?}");
    assert_eq!(storage.get(&ctx, &lock_id).expect("get"), "a");
}

/// Bootstrapping again is harmless and keeps existing rows.
pub fn check_bootstrap_idempotent(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let lock_id = unique_lock_id("bootstrap");
    storage
        .create_with_version(&ctx, &lock_id, Version::new(1), &LockInformation::new("o", "kept"))
        .expect("create");
    storage.bootstrap(&ctx).expect("second bootstrap");
    storage.bootstrap(&ctx).expect("third bootstrap");
    assert_eq!(storage.get(&ctx, &lock_id).expect("row survives bootstrap"), "kept");
}

/// Repeated bootstraps leave the table definition unchanged.
///
/// `describe_schema` returns the lock table's column definitions as the
/// backend's catalog reports them, in column order.
pub fn check_bootstrap_keeps_schema(
    storage: &dyn LockStorage,
    describe_schema: &dyn Fn() -> Vec<String>,
) {
    let ctx = OpContext::background();
    let before = describe_schema();
    assert!(!before.is_empty(), "lock table has no columns");
    storage.bootstrap(&ctx).expect("repeat bootstrap");
    storage.bootstrap(&ctx).expect("repeat bootstrap");
    assert_eq!(describe_schema(), before);
}

/// Listing yields every created lock with its version.
pub fn check_list(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let prefix = format!("{}-", unique_lock_id("list"));
    let ids: Vec<String> = (0 .. 3).map(|index| format!("{prefix}{index}")).collect();
    for (offset, lock_id) in (1_u64 ..).zip(&ids) {
        storage
            .create_with_version(&ctx, lock_id, Version::new(offset), &LockInformation::new("o", "p"))
            .expect("create");
    }
    let listed: Vec<_> = storage
        .list(&ctx)
        .expect("list")
        .collect::<Result<Vec<_>, _>>()
        .expect("list rows")
        .into_iter()
        .filter(|record| record.lock_id.starts_with(&prefix))
        .collect();
    assert_eq!(listed.len(), ids.len());
    for (offset, record) in (1_u64 ..).zip(&listed) {
        assert_eq!(record.version, Version::new(offset));
        assert_eq!(record.owner_id, "o");
    }
}

/// The server clock reads as a plausible current time.
pub fn check_server_time(storage: &dyn LockStorage) {
    let ctx = OpContext::background();
    let server = storage.server_time(&ctx).expect("server time");
    assert!(server.year() >= 2020, "implausible server time {server:?}");
}

/// Runs every conformance check in sequence.
pub fn run_conformance_suite(storage: &dyn LockStorage) {
    check_bootstrap_idempotent(storage);
    check_create_conflict(storage);
    check_update_gate(storage);
    check_delete_gate(storage);
    check_round_trip(storage);
    check_end_to_end(storage);
    check_owner_gate(storage);
    check_list(storage);
    check_server_time(storage);
}

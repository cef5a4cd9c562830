// crates/storage-lock-core/src/model/context.rs
// ============================================================================
// Module: Operation Context
// Description: Deadlines and cancellation for storage operations.
// Purpose: Let callers bound every blocking store call.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! Every store and connection-manager call takes an [`OpContext`]. The context
//! is checked on entry and handed down to the driver, which bounds its own
//! waits by the remaining time. Stores never retry a cancelled or timed-out
//! operation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use crate::interfaces::StorageError;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Shared flag a caller flips to abandon in-flight operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled. Clones observe the change.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Deadline and cancellation scope for one storage call.
///
/// # Invariants
/// - A context without deadline or token never fails [`OpContext::check`].
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    /// Absolute instant after which the operation is abandoned.
    deadline: Option<Instant>,
    /// Optional caller-controlled cancellation flag.
    cancel: Option<CancelToken>,
}

impl OpContext {
    /// Returns an unbounded context.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a copy bounded by an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Returns a copy bounded by a timeout measured from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Returns a copy observing the given cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Applies `timeout` only when the context carries no deadline yet.
    #[must_use]
    pub fn or_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.clone().with_timeout(timeout),
            _ => self.clone(),
        }
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline (zero once it has passed).
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true when the caller cancelled the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Returns true when the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails fast when the operation should not proceed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] or [`StorageError::DeadlineExceeded`].
    pub fn check(&self) -> Result<(), StorageError> {
        if self.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if self.is_expired() {
            return Err(StorageError::DeadlineExceeded);
        }
        Ok(())
    }
}

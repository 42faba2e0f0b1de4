//! Cooperative cancellation for consolidations
//!
//! Checked before the document lock is taken, once it is held, and again
//! just before the commit. A commit that has started is never interrupted.

use super::{ConsolidationError, ConsolidationResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancel flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub(crate) fn check(&self) -> ConsolidationResult<()> {
        if self.is_cancelled() {
            return Err(ConsolidationError::Cancelled);
        }
        Ok(())
    }
}

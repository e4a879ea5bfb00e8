//! Cooperative cancellation.
//!
//! Long operations (summary reads, rearrangement, saving) call
//! [`CancelToken::checkpoint`] between top-level child transitions. On
//! cancel, partial mutations may remain in memory; the backing file is not
//! modified until a save actually starts writing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mkedit_error::{EbmlError, Result};

/// A shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Return `Err(Cancelled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EbmlError::Cancelled)
        } else {
            Ok(())
        }
    }
}

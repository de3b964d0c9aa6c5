//! Cooperative cancellation shared between the orchestrator and its workers.
use crate::error::{Result, SrrError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap clonable flag checked between slices and between solver iterations.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SrrError::Cancelled)
        } else {
            Ok(())
        }
    }
}

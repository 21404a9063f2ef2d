//! Cooperative cancellation for long-running decompilation work.
//!
//! A [`CancellationToken`] is cloned into every worker. Transforms poll it at
//! well-defined checkpoints (between pipeline stages, between control-flow graph
//! construction phases, and inside fixpoint loops) and bail out with
//! [`Error::Cancelled`] once it has been triggered.
//!
//! # Thread Safety
//!
//! The token is an `Arc<AtomicBool>`; cancelling from any thread is observed by
//! all clones.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{Error, Result};

/// A cloneable flag that requests cancellation of in-flight work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`CancellationToken::cancel`] was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Checkpoint helper for use with `?`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_visible_across_clones() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());

        let clone = token.clone();
        thread::spawn(move || clone.cancel()).join().unwrap();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}

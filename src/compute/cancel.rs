//! cancel.rs
//! Cooperative cancellation of a running evaluation.

use super::error::EvalError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag plus an optional deadline. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    /// A token sharing this flag that also expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self { flag: Arc::clone(&self.flag), deadline: Some(Instant::now() + timeout) }
    }

    pub fn cancel(&self) { self.flag.store(true, Ordering::SeqCst); }

    /// Clears the flag so the owning simulation can be used again.
    pub fn reset(&self) { self.flag.store(false, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> Result<(), EvalError> {
        if self.is_cancelled() { Err(EvalError::Cancelled) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(other.check().is_ok());
        token.cancel();
        assert_eq!(other.check(), Err(EvalError::Cancelled));
        token.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_deadline_expires() {
        let token = CancelToken::new().with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
    }
}

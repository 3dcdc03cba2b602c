//! Cooperative cancellation with an optional deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a scheduled operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Cancelled,
    TimedOut,
}

/// Shared stop flag plus an optional deadline.
///
/// Clones share the flag, so a token handed to another thread can cancel
/// the operation holding the original.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never expires on its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now. A timeout too large to represent never
    /// expires.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Explicit cancellation takes precedence over expiry.
    pub fn check(&self) -> Result<(), Interruption> {
        if self.is_cancelled() {
            Err(Interruption::Cancelled)
        } else if self.is_expired() {
            Err(Interruption::TimedOut)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes() {
        let token = CancelToken::new();
        assert_eq!(token.check(), Ok(()));
        assert_eq!(token.remaining(), None);
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        let handle = token.clone();
        handle.cancel();
        assert_eq!(token.check(), Err(Interruption::Cancelled));
    }

    #[test]
    fn past_deadline_times_out() {
        let token = CancelToken::with_deadline(Instant::now());
        assert_eq!(token.check(), Err(Interruption::TimedOut));
        assert_eq!(token.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn huge_timeout_never_expires() {
        let token = CancelToken::with_timeout(Duration::MAX);
        assert_eq!(token.check(), Ok(()));
    }
}

//! Bounded retry and cooperative cancellation for remote service calls.
//!
//! The upstream hydrology services fail transiently often enough that every
//! call is wrapped in a fixed attempt ceiling. Attempts are immediate unless a
//! delay is configured. A [`CancelToken`] is checked before every attempt so a
//! long retry loop can be abandoned from another thread.

use crate::model::{ReachError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared cancellation flag. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReachError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Attempt ceiling plus an optional fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Runs `op` until it succeeds or the ceiling is reached.
    ///
    /// `op` receives the 1-based attempt number. The error from the final
    /// attempt is returned on exhaustion. `Cancelled` is never retried.
    pub fn run<T, F>(&self, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            cancel.check()?;
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(ReachError::Cancelled) => return Err(ReachError::Cancelled),
                Err(e) => last_err = Some(e),
            }
            if attempt < attempts && !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
        }

        Err(last_err.unwrap_or(ReachError::Cancelled))
    }
}

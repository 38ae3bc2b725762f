//! RetryBudget - bounded failure counter for one upscale request.

use std::fmt;

/// Step failures tolerated per upscale request before giving up.
pub const UPSCALE_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryError {
    pub failures: u32,
    pub max_retries: u32,
    pub context: String,
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Retry budget exhausted: {} failures with {} retries allowed in {}",
            self.failures, self.max_retries, self.context
        )
    }
}

impl std::error::Error for RetryError {}

/// Counts failures; the failure after the last retry is the one that aborts.
///
/// Failures are cumulative over the request, not reset by a success.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    failures: u32,
    max_retries: u32,
    context: String,
}

impl RetryBudget {
    pub fn new(max_retries: u32, context: &str) -> Self {
        Self {
            failures: 0,
            max_retries,
            context: context.to_string(),
        }
    }

    pub fn for_upscale(context: &str) -> Self {
        Self::new(UPSCALE_MAX_RETRIES, context)
    }

    /// Returns the retries still left, or an error once none were left.
    pub fn record_failure(&mut self) -> Result<u32, RetryError> {
        self.failures += 1;
        if self.failures > self.max_retries {
            Err(RetryError {
                failures: self.failures,
                max_retries: self.max_retries,
                context: self.context.clone(),
            })
        } else {
            Ok(self.remaining())
        }
    }

    #[inline]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.failures)
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.failures > self.max_retries
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

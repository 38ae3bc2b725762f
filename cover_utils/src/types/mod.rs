//! Type-Safe Wrappers Module
//!
//! - `retry`: bounded failure budget for the upscale loop

pub mod retry;

pub use retry::{RetryBudget, RetryError, UPSCALE_MAX_RETRIES};

// ============================================================================
// Property-Based Tests
// ============================================================================

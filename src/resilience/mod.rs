//! # Resilience Module
//!
//! Declarative retry policies and the small interpreter that applies them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gridload_core::resilience::{execute_with_retry, RetryPolicy};
//! use gridload_core::GridloadError;
//!
//! # async fn example() {
//! let policy = RetryPolicy::fast_stage();
//! let outcome = execute_with_retry(&policy, "probe_store", |_attempt| async {
//!     Err::<(), _>(GridloadError::transient("store", "connection reset"))
//! })
//! .await;
//!
//! assert_eq!(outcome.attempts, 3);
//! # }
//! ```

pub mod retry_executor;
pub mod retry_policy;

pub use retry_executor::{execute_with_retry, RetryOutcome};
pub use retry_policy::{GiveUpReason, RetryDecision, RetryPolicy};

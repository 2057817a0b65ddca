//! Failure classification and retry backoff.
//!
//! Every failed transfer attempt is mapped onto a [`FailureKind`]; the
//! scheduler then asks [`RetryPolicy::decide`] whether the task goes back into
//! the queue (and after how long) or ends Failed.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::TransferError;
pub use policy::{FailureKind, RetryDecision, RetryPolicy};

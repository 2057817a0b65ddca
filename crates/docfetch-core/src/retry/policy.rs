use std::time::Duration;

/// Failure taxonomy for one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, connection resets, DNS, HTTP 408/429/5xx.
    Transient,
    /// Other 4xx, source rejection, executor crash.
    Permanent,
    /// 401/403 or a login wall: the task waits for credentials.
    AuthRequired,
    /// Length mismatch or unexpected range; the partial file is discarded.
    Integrity,
    /// Disk full, permission denied.
    LocalResource,
}

impl FailureKind {
    /// Whether a failure of this kind may be retried automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Integrity)
    }

    /// Whether a failure of this kind counts as a finished attempt.
    pub fn counts_as_attempt(self) -> bool {
        !matches!(self, FailureKind::AuthRequired)
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up: the task becomes Failed.
    NoRetry,
    /// Re-queue the task, eligible again after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of counted attempts (including the first).
    pub retry_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Decide what happens after a failure.
    ///
    /// `attempt_count` is the task's counter *after* the failed attempt was
    /// counted (1 = the first attempt just failed).
    pub fn decide(&self, attempt_count: u32, kind: FailureKind) -> RetryDecision {
        if !kind.is_retryable() || attempt_count >= self.retry_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(attempt_count))
    }

    /// `base * 2^(attempt_count-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exp = 1u32 << attempt_count.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}

//! Transfer error type, classified before it is turned into a task's `last_error`.

/// Why one transfer attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Curl reported an error (timeout, connection, TLS, ...).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Response had a non-success status.
    #[error("HTTP {0}")]
    Http(u32),
    /// The source answered with a login wall or equivalent.
    #[error("credentials required")]
    CredentialsRequired,
    /// The source adapter refused the request or the response.
    #[error("rejected by source: {0}")]
    Rejected(String),
    /// Body length did not match the advertised total.
    #[error("integrity mismatch: expected {expected} bytes, got {received}")]
    IntegrityMismatch { expected: u64, received: u64 },
    /// A ranged response did not start where the partial file ends.
    #[error("unexpected content range: {0}")]
    UnexpectedRange(String),
    /// Disk/storage failure (disk full, permission denied, rename).
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    /// Executor failed outside the transfer itself (panic, join error).
    #[error("internal: {0}")]
    Internal(String),
}

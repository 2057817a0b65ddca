//! Map HTTP statuses, curl errors and transfer errors onto failure kinds.

use crate::retry::error::TransferError;
use crate::retry::policy::FailureKind;

/// Classify an HTTP status code.
pub fn classify_http_status(code: u32) -> FailureKind {
    match code {
        401 | 403 => FailureKind::AuthRequired,
        408 | 429 => FailureKind::Transient,
        412 | 416 => FailureKind::Integrity,
        500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> FailureKind {
    if e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return FailureKind::Transient;
    }
    if e.is_write_error() {
        return FailureKind::LocalResource;
    }
    FailureKind::Permanent
}

pub fn classify(e: &TransferError) -> FailureKind {
    match e {
        TransferError::Curl(ce) => classify_curl_error(ce),
        TransferError::Http(code) => classify_http_status(*code),
        TransferError::CredentialsRequired => FailureKind::AuthRequired,
        TransferError::Rejected(_) | TransferError::Internal(_) => FailureKind::Permanent,
        TransferError::IntegrityMismatch { .. } | TransferError::UnexpectedRange(_) => {
            FailureKind::Integrity
        }
        TransferError::Storage(_) => FailureKind::LocalResource,
    }
}

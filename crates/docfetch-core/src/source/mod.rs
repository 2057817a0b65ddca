//! Per-source request building and response checks.
//!
//! A [`SourceAdapter`] turns a task (plus any credentials) into the request
//! the executor sends, and judges the response head before any body byte is
//! written. Most sources are served by the configurable [`HttpSource`].

mod credentials;
mod http;
mod registry;

pub use credentials::{CredentialProvider, Credentials, StaticCredentials};
pub use http::HttpSource;
pub use registry::SourceRegistry;

use crate::retry::TransferError;
use crate::task::DownloadTask;

/// Request the executor will send for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    /// Extra headers, sent in order.
    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<(String, String)>,
    pub user_agent: String,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            basic_auth: None,
            user_agent: concat!("docfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Status line and headers of the final response (after redirects).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u32,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Verdict on a response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCheck {
    Proceed,
    /// Login wall or auth challenge: pause the task until credentials arrive.
    CredentialsRequired,
    /// The source does not serve this document; fail the attempt permanently.
    Reject(String),
}

/// Source-specific behaviour. Implementations must be cheap to call and thread-safe.
pub trait SourceAdapter: Send + Sync {
    fn build_request(
        &self,
        task: &DownloadTask,
        credentials: Option<&Credentials>,
    ) -> Result<RequestSpec, TransferError>;

    fn validate_response(&self, head: &ResponseHead) -> ResponseCheck;
}

//! Credentials collaborator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::task::DownloadTask;

/// Secrets for one source. Any combination may be set.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Header carrying `api_key` (default `X-API-Key`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("api_key", &redact(&self.api_key))
            .field("api_key_header", &self.api_key_header)
            .field("token", &redact(&self.token))
            .field("session_cookie", &redact(&self.session_cookie))
            .finish()
    }
}

/// Supplies credentials per source and hears about tasks that need them.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, source_id: &str) -> Option<Credentials>;

    /// Called once when a task is paused with `credentials_required`.
    fn credentials_required(&self, _task: &DownloadTask) {}
}

/// Fixed credentials, usually from the `[credentials.*]` config tables.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    by_source: BTreeMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new(by_source: BTreeMap<String, Credentials>) -> Self {
        Self { by_source }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self, source_id: &str) -> Option<Credentials> {
        self.by_source.get(source_id).cloned()
    }

    fn credentials_required(&self, task: &DownloadTask) {
        tracing::warn!(
            task_id = task.id,
            source = %task.source_id,
            "source requires credentials; task paused"
        );
    }
}

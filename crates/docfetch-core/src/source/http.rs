//! Generic HTTP source driven by config.

use std::collections::BTreeMap;

use super::{Credentials, RequestSpec, ResponseCheck, ResponseHead, SourceAdapter};
use crate::config::SourceConfig;
use crate::retry::TransferError;
use crate::task::DownloadTask;

#[derive(Debug, Clone, Default)]
pub struct HttpSource {
    headers: BTreeMap<String, String>,
    login_on_html: bool,
}

impl HttpSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &SourceConfig) -> Self {
        Self {
            headers: cfg.headers.clone(),
            login_on_html: cfg.login_on_html,
        }
    }

    /// Treat a successful `text/html` response as a login page.
    pub fn with_login_on_html(mut self, on: bool) -> Self {
        self.login_on_html = on;
        self
    }
}

impl SourceAdapter for HttpSource {
    fn build_request(
        &self,
        task: &DownloadTask,
        credentials: Option<&Credentials>,
    ) -> Result<RequestSpec, TransferError> {
        let mut req = RequestSpec::get(&task.url);
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        let Some(creds) = credentials else {
            return Ok(req);
        };
        if let Some(token) = &creds.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(key) = &creds.api_key {
            let header = creds.api_key_header.as_deref().unwrap_or("X-API-Key");
            req = req.header(header, key);
        }
        if let Some(cookie) = &creds.session_cookie {
            req = req.header("Cookie", cookie);
        }
        if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
            req.basic_auth = Some((user.clone(), pass.clone()));
        }
        Ok(req)
    }

    fn validate_response(&self, head: &ResponseHead) -> ResponseCheck {
        if matches!(head.status, 401 | 403) {
            return ResponseCheck::CredentialsRequired;
        }
        if self.login_on_html && head.is_success() {
            let html = head
                .content_type()
                .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/html"))
                .unwrap_or(false);
            if html {
                return ResponseCheck::CredentialsRequired;
            }
        }
        ResponseCheck::Proceed
    }
}

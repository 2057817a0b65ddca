//! Enqueue-time validation. Errors are surfaced synchronously to the caller.

use super::EnqueueRequest;

/// Why an enqueue request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("url is missing")]
    MissingUrl,
    #[error("url is not valid: {0}")]
    InvalidUrl(String),
    #[error("unsupported url scheme: {0} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("source id is missing")]
    MissingSource,
    #[error("destination path is missing")]
    MissingDestination,
    #[error("destination path is a directory: {0}")]
    DestinationIsDirectory(String),
}

impl EnqueueRequest {
    /// Checks the request without touching any state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        let parsed =
            url::Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        }
        if parsed.host_str().is_none() {
            return Err(ValidationError::InvalidUrl(format!("{url}: missing host")));
        }

        if self.source_id.trim().is_empty() {
            return Err(ValidationError::MissingSource);
        }

        let dest = &self.destination_path;
        if dest.as_os_str().is_empty() {
            return Err(ValidationError::MissingDestination);
        }
        if dest.is_dir() || dest.file_name().is_none() {
            return Err(ValidationError::DestinationIsDirectory(
                dest.display().to_string(),
            ));
        }
        Ok(())
    }
}

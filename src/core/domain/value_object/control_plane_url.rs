use crate::core::domain::error::ValidationError;
use url::Url;

const MAX_URL_LENGTH: usize = 2083;
const API_PATH: &str = "client/api";

/// A validated base URL of the control-plane API.
///
/// Accepts either the management server root (`https://cloud.example.com/`)
/// or the API endpoint itself (`https://cloud.example.com/client/api`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneUrl(Url);

impl ControlPlaneUrl {
    /// Parses and validates a URL.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        validate_url(value).map(Self)
    }

    /// Returns the URL as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the host part of the URL.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    /// Returns the full API endpoint (`.../client/api`).
    #[must_use]
    pub fn api_endpoint(&self) -> Url {
        let trimmed = self.0.path().trim_end_matches('/');
        if trimmed.ends_with(API_PATH) {
            return self.0.clone();
        }
        let mut endpoint = self.0.clone();
        endpoint.set_path(&format!("{}/{}", trimmed, API_PATH));
        endpoint.set_query(None);
        endpoint
    }
}

/// Validates a control-plane URL.
pub(crate) fn validate_url(value: &str) -> Result<Url, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Field {
            field: "url".to_string(),
            message: "URL cannot be empty".to_string(),
        });
    }
    if value.len() > MAX_URL_LENGTH {
        return Err(ValidationError::Format(format!(
            "URL exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        )));
    }
    let url =
        Url::parse(value).map_err(|e| ValidationError::Format(format!("Invalid URL format: {}", e)))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ValidationError::ConstraintViolation(format!(
            "Invalid scheme '{}'. Must be one of: http, https",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ValidationError::Format("URL has no host".to_string()));
    }
    Ok(url)
}

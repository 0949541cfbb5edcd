use crate::core::domain::error::ValidationError;
use std::time::{Duration, SystemTime};

/// A control-plane session key obtained at login.
#[derive(Debug, Clone)]
pub struct SessionKey {
    value: String,
    created_at: SystemTime,
}

impl SessionKey {
    /// Creates a new session key without validation.
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self {
            value,
            created_at: SystemTime::now(),
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Checks if the session is expired based on a given lifetime.
    #[must_use]
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.created_at
            .elapsed()
            .map(|age| age > lifetime)
            .unwrap_or(true)
    }
}

/// Validates the format of a session key.
pub(crate) fn validate_session_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::Field {
            field: "sessionkey".to_string(),
            message: "Session key cannot be empty".to_string(),
        });
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ValidationError::Format(
            "Session key cannot contain whitespace".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_key() {
        assert!(validate_session_key("Zm9vYmFy-123").is_ok());
        assert!(validate_session_key("").is_err());
        assert!(validate_session_key("a b").is_err());
    }

    #[test]
    fn test_session_expiry() {
        let key = SessionKey::new_unchecked("abc".to_string());
        assert!(!key.is_expired(Duration::from_secs(3600)));
    }
}

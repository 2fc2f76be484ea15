//! Authorized-URL pre-check
//!
//! Front ends check the URL before any engine work happens, so a rejected
//! request never costs a browser launch.

use crate::ExportError;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// `None` authorizes every URL.
    pattern: Option<Regex>,
}

impl UrlPolicy {
    /// Build a policy from an unanchored regular expression.
    pub fn new(pattern: &str) -> Result<Self, ExportError> {
        let pattern = Regex::new(pattern).map_err(|e| {
            ExportError::Configuration(format!("Invalid authorized URL pattern: {e}"))
        })?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// A policy authorizing every URL.
    pub fn allow_all() -> Self {
        Self { pattern: None }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    pub fn authorize_url(&self, url: &str) -> Result<(), ExportError> {
        let authorized = self
            .pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(url));
        if authorized {
            Ok(())
        } else {
            Err(ExportError::Authorization(url.to_string()))
        }
    }

    /// Check the `url` of an unvalidated payload.
    ///
    /// A missing or non-string `url` passes; validation reports it later.
    pub fn authorize(&self, payload: &Value) -> Result<(), ExportError> {
        match payload.get("url").and_then(Value::as_str) {
            Some(url) => self.authorize_url(url),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pattern_is_unanchored() {
        let policy = UrlPolicy::new(r"^https://([a-z]+\.)?example\.com").unwrap();

        assert!(policy.authorize_url("https://example.com/dashboard").is_ok());
        assert!(policy.authorize_url("https://app.example.com").is_ok());
        assert!(matches!(
            policy.authorize_url("https://bad.domain.com"),
            Err(ExportError::Authorization(_))
        ));
    }

    #[test]
    fn test_authorize_payload() {
        let policy = UrlPolicy::new("example").unwrap();

        let error = policy
            .authorize(&json!({"url": "https://bad.domain.com"}))
            .unwrap_err();
        assert_eq!(error.to_string(), "The URL https://bad.domain.com is not authorized.");
        assert!(policy.authorize(&json!({})).is_ok());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(UrlPolicy::new("("), Err(ExportError::Configuration(_))));
        assert!(UrlPolicy::allow_all().authorize_url("anything").is_ok());
    }

    #[test]
    fn test_pattern_is_reported_as_given() {
        let policy = UrlPolicy::new(r"^https://example\.com").unwrap();
        assert_eq!(policy.pattern(), Some(r"^https://example\.com"));
        assert_eq!(UrlPolicy::allow_all().pattern(), None);
    }
}

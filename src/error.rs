use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExportError {
    #[error("{0}")]
    Validation(String),

    #[error("The URL {0} is not authorized.")]
    Authorization(String),

    #[error("Invalid paper dimension: {0}")]
    InvalidDimension(String),

    #[error("The timeout should be a strictly positive amount of seconds but {0} was given.")]
    InvalidTimeout(String),

    #[error("Execution context not available yet: {0}")]
    TransientContext(String),

    #[error("{message}")]
    Timeout { message: String },

    #[error("Browser launch failed: {0}")]
    EngineLaunch(String),

    #[error("Browser error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ExportError {
    pub fn timeout(message: impl Into<String>) -> Self {
        ExportError::Timeout {
            message: message.into(),
        }
    }

    /// Only a missing execution context may be retried, and only inside the
    /// context waiter.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExportError::TransientContext(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExportError::Timeout { .. })
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::Validation(_) => "validation",
            ExportError::Authorization(_) => "authorization",
            ExportError::InvalidDimension(_) => "invalid_dimension",
            ExportError::InvalidTimeout(_) => "invalid_timeout",
            ExportError::TransientContext(_) => "transient_context",
            ExportError::Timeout { .. } => "timeout",
            ExportError::EngineLaunch(_) => "engine_launch",
            ExportError::Engine(_) => "engine",
            ExportError::Configuration(_) => "configuration",
            ExportError::Io(_) => "io",
            ExportError::Serialization(_) => "serialization",
        }
    }
}

/// Driver messages meaning the page has no script context yet. A navigation
/// in flight tears the context down and the next evaluation lands before the
/// new one exists.
const MISSING_CONTEXT_MESSAGES: &[&str] = &[
    "Cannot find context with specified id",
    "Execution context was destroyed",
    "Cannot find default execution context",
];

pub(crate) fn is_missing_context_message(message: &str) -> bool {
    MISSING_CONTEXT_MESSAGES
        .iter()
        .any(|pattern| message.contains(pattern))
}

impl From<chromiumoxide::error::CdpError> for ExportError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        let message = err.to_string();
        if is_missing_context_message(&message) {
            ExportError::TransientContext(message)
        } else {
            ExportError::Engine(message)
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_missing_context_is_transient() {
        assert!(ExportError::TransientContext("x".to_string()).is_transient());
        assert!(!ExportError::Engine("x".to_string()).is_transient());
        assert!(!ExportError::timeout("x").is_transient());
    }

    #[test]
    fn test_missing_context_messages() {
        assert!(is_missing_context_message(
            "Protocol error (Runtime.evaluate): Cannot find context with specified id undefined"
        ));
        assert!(is_missing_context_message("Execution context was destroyed, most likely because of a navigation."));
        assert!(!is_missing_context_message("net::ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn test_messages_are_caller_facing() {
        assert_eq!(
            ExportError::Authorization("https://bad.domain.com".to_string()).to_string(),
            "The URL https://bad.domain.com is not authorized."
        );
        assert_eq!(
            ExportError::InvalidTimeout("0".to_string()).to_string(),
            "The timeout should be a strictly positive amount of seconds but 0 was given."
        );
        assert_eq!(ExportError::timeout("too slow").to_string(), "too slow");
        assert_eq!(ExportError::timeout("too slow").kind(), "timeout");
    }
}

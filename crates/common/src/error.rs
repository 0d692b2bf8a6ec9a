use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification for Theodore operations.
///
/// The first four kinds are recoverable: a phase may spend retry budget on
/// them. Everything else either bubbles up immediately or is a terminal
/// verdict on the whole analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A single call or wait exceeded its time budget.
    Timeout,
    /// Provider returned HTTP 429 or equivalent.
    RateLimited,
    /// Connection, DNS, or TLS failure.
    Transport,
    /// LLM returned unparsable or schema-violating content.
    InvalidResponse,
    /// 403 or a bot-challenge page stood between us and the content.
    ProtectedSite,
    /// Auth failure or hard quota exhaustion at the provider.
    ProviderFatal,
    /// The overall analysis budget elapsed.
    Deadline,
    Cancelled,
    /// Repeated 429s survived the retry budget.
    QuotaExceeded,
    /// Every page fetch in the extraction phase failed.
    NoContent,
    Config,
    Internal,
}

impl ErrorKind {
    /// Whether a phase may spend retry budget on this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Transport | Self::InvalidResponse
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Transport => "transport",
            Self::InvalidResponse => "invalid_response",
            Self::ProtectedSite => "protected_site",
            Self::ProviderFatal => "provider_fatal",
            Self::Deadline => "deadline",
            Self::Cancelled => "cancelled",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NoContent => "no_content",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

/// Top-level error type for Theodore operations.
#[derive(Clone, Debug, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct TheodoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TheodoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResponse, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl From<serde_json::Error> for TheodoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidResponse, e.to_string())
    }
}

/// Result type alias for Theodore operations.
pub type Result<T> = std::result::Result<T, TheodoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::Timeout.is_recoverable());
        assert!(ErrorKind::RateLimited.is_recoverable());
        assert!(ErrorKind::Transport.is_recoverable());
        assert!(ErrorKind::InvalidResponse.is_recoverable());

        assert!(!ErrorKind::ProviderFatal.is_recoverable());
        assert!(!ErrorKind::Cancelled.is_recoverable());
        assert!(!ErrorKind::Deadline.is_recoverable());
        assert!(!ErrorKind::ProtectedSite.is_recoverable());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = TheodoreError::new(ErrorKind::QuotaExceeded, "429 after 3 attempts");
        assert_eq!(err.to_string(), "quota_exceeded: 429 after 3 attempts");
    }
}

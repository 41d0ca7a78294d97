use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Batch, ClassificationResult, TableContext};

/// Errors raised by a classifier backend.
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Any other failed request; `status` is the HTTP status when there was
    /// one.
    #[error("request failed: {message}")]
    RequestFailed { status: Option<u16>, message: String },

    /// HTTP 401/403 from the backend.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// HTTP 429; quota or rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClassifierError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifierError::RateLimited(_) | ClassifierError::Timeout | ClassifierError::Http(_) => {
                true
            }
            ClassifierError::RequestFailed { status, .. } => {
                matches!(status, Some(500 | 502 | 503 | 504))
            }
            ClassifierError::AuthFailed(_)
            | ClassifierError::NotConfigured(_)
            | ClassifierError::InvalidResponse(_)
            | ClassifierError::Json(_) => false,
        }
    }
}

/// Labels one batch of rows. Implementations return exactly one result per
/// row, in batch order; the pipeline rejects anything else.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        context: &TableContext,
        batch: &Batch<'_>,
    ) -> Result<Vec<ClassificationResult>, ClassifierError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_failed(status: Option<u16>, message: &str) -> ClassifierError {
        ClassifierError::RequestFailed {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn transient_errors() {
        assert!(ClassifierError::Timeout.is_transient());
        assert!(ClassifierError::RateLimited("quota".into()).is_transient());
        assert!(request_failed(Some(503), "HTTP 503 Service Unavailable: busy").is_transient());
        assert!(!request_failed(Some(400), "HTTP 400 Bad Request: nope").is_transient());
        assert!(!request_failed(Some(501), "HTTP 501 Not Implemented").is_transient());
        assert!(!request_failed(None, "HTTP 500 in the message only").is_transient());
        assert!(!ClassifierError::AuthFailed("bad key".into()).is_transient());
        assert!(!ClassifierError::InvalidResponse("no candidates".into()).is_transient());
    }

    #[test]
    fn display_rate_limited() {
        let err = ClassifierError::RateLimited("quota exceeded".into());
        assert_eq!(err.to_string(), "rate limited: quota exceeded");
    }
}

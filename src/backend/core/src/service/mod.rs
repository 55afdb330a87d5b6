//! The external conversion capability.
//!
//! The scheduler treats conversion as a black box. All it needs from an
//! implementation is a result or an error that says whether trying again
//! could help.

pub mod http;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::batch::{ConversionInput, ConversionOutput, ErrorClass, JobFailure};

pub use http::{HttpConversionConfig, HttpConversionService};

/// Why a conversion attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Connection refused, reset, DNS failure...
    #[error("network error: {0}")]
    Network(String),

    /// The service asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// No answer within the call deadline.
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    /// The service is temporarily down (5xx).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The input cannot be converted as submitted.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The service refused the job permanently.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The service answered with something we cannot use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ConversionError {
    /// Transient errors are retried; fatal errors end the job.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::RateLimited(_) | Self::Timeout(_) | Self::Unavailable(_) => {
                ErrorClass::Transient
            }
            Self::MalformedInput(_) | Self::Rejected(_) | Self::InvalidResponse(_) => {
                ErrorClass::Fatal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::MalformedInput(_) => "malformed_input",
            Self::Rejected(_) => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<ConversionError> for JobFailure {
    fn from(error: ConversionError) -> Self {
        JobFailure::new(error.class(), error.code(), error.to_string())
    }
}

/// Performs the actual transformation.
#[async_trait]
pub trait ConversionService: Send + Sync {
    async fn convert(
        &self,
        input: &ConversionInput,
    ) -> std::result::Result<ConversionOutput, ConversionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ConversionError::Network("reset".into()).is_transient());
        assert!(ConversionError::RateLimited("429".into()).is_transient());
        assert!(ConversionError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ConversionError::Unavailable("503".into()).is_transient());

        assert_eq!(
            ConversionError::MalformedInput("bad".into()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(ConversionError::Rejected("no".into()).class(), ErrorClass::Fatal);
        assert_eq!(
            ConversionError::InvalidResponse("garbage".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_into_job_failure() {
        let failure = JobFailure::from(ConversionError::RateLimited("slow down".into()));
        assert_eq!(failure.class, ErrorClass::Transient);
        assert_eq!(failure.code, "rate_limited");
        assert_eq!(failure.message, "rate limited: slow down");
    }
}

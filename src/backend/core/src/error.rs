//! Crate error type.
//!
//! [`TransmuteError`] is what crosses the public API and the HTTP boundary. It
//! pairs a stable [`ErrorCode`] with a message safe to show clients and an
//! optional internal message that only reaches the logs.
//!
//! Failures that callers branch on stay typed where they happen:
//! [`crate::service::ConversionError`] for the conversion service and
//! [`crate::batch::PersistenceError`] for the durable store.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use tracing::Level;

pub type Result<T> = std::result::Result<T, TransmuteError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable, machine-readable error codes. Clients match on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Submission rejected (empty batch, zero limits, repeated file names)
    InvalidBatch,
    BatchNotFound,
    /// The operation needs a finished batch
    BatchStillRunning,
    InvalidStateTransition,
    /// Malformed request payload
    ValidationError,

    DatabaseError,
    DatabaseUnavailable,

    ConversionServiceError,
    Timeout,

    SerializationError,
    ConfigurationError,
    InternalError,
}

impl ErrorCode {
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::BatchNotFound => StatusCode::NOT_FOUND,
            Self::BatchStillRunning | Self::InvalidStateTransition => StatusCode::CONFLICT,
            Self::InvalidBatch | Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConversionServiceError => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::DatabaseError
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether repeating the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseUnavailable | Self::ConversionServiceError | Self::Timeout
        )
    }

    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidBatch
            | Self::BatchNotFound
            | Self::BatchStillRunning
            | Self::InvalidStateTransition => "batch",
            Self::ValidationError => "validation",
            Self::DatabaseError | Self::DatabaseUnavailable => "database",
            Self::ConversionServiceError | Self::Timeout => "conversion",
            Self::SerializationError => "serialization",
            Self::ConfigurationError => "configuration",
            Self::InternalError => "internal",
        }
    }

    /// Client mistakes log at debug, operational trouble at warn, the rest at error.
    pub const fn log_level(&self) -> Level {
        match self {
            Self::InvalidBatch
            | Self::BatchNotFound
            | Self::BatchStillRunning
            | Self::ValidationError => Level::DEBUG,
            Self::InvalidStateTransition | Self::ConversionServiceError | Self::Timeout => {
                Level::WARN
            }
            Self::DatabaseError
            | Self::DatabaseUnavailable
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InternalError => Level::ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TransmuteError
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct TransmuteError {
    code: ErrorCode,
    /// Safe to return to clients
    message: Cow<'static, str>,
    /// Logs only
    internal: Option<String>,
    context: BTreeMap<String, serde_json::Value>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for TransmuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(internal) = &self.internal {
            write!(f, " ({})", internal)?;
        }
        Ok(())
    }
}

impl std::error::Error for TransmuteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl TransmuteError {
    /// Every constructed error bumps `transmute_errors_total`.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        counter!(
            "transmute_errors_total",
            "code" => code.to_string(),
            "category" => code.category(),
        )
        .increment(1);

        Self {
            code,
            message: message.into(),
            internal: None,
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// An error whose details stay out of client responses.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal = Some(internal.into());
        error
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn invalid_batch(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidBatch, message)
    }

    pub fn batch_not_found(batch_id: impl fmt::Display) -> Self {
        let id = batch_id.to_string();
        Self::new(ErrorCode::BatchNotFound, format!("Batch not found: {}", id))
            .with_context("batch_id", id)
    }

    pub fn batch_still_running(batch_id: impl fmt::Display) -> Self {
        let id = batch_id.to_string();
        Self::new(
            ErrorCode::BatchStillRunning,
            format!("Batch {} has not finished yet", id),
        )
        .with_context("batch_id", id)
    }

    pub fn invalid_state_transition(
        job_id: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Job {} cannot move from {} to {}", job_id, from, to),
        )
        .with_context("from", from.to_string())
        .with_context("to", to.to_string())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::ConfigurationError, "Configuration error", message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a key/value pair returned to clients under `details`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Emit a tracing event at the code's level.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        let level = self.code.log_level();
        if level == Level::ERROR {
            tracing::error!(
                error_code = %code,
                category,
                http_status = status,
                user_message = %self.message,
                internal = ?self.internal,
                source = ?self.source,
                "Request failed"
            );
        } else if level == Level::WARN {
            tracing::warn!(
                error_code = %code,
                category,
                http_status = status,
                user_message = %self.message,
                internal = ?self.internal,
                "Request failed"
            );
        } else {
            tracing::debug!(
                error_code = %code,
                category,
                http_status = status,
                user_message = %self.message,
                "Request rejected"
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body. Same `success` / `error` / `error_code` envelope as
/// [`crate::api::ApiResponse`].
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: ErrorCode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<&TransmuteError> for ErrorResponse {
    fn from(error: &TransmuteError) -> Self {
        Self {
            success: false,
            error: error.message.to_string(),
            error_code: error.code,
            details: error.context.clone(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for TransmuteError {
    fn into_response(self) -> Response {
        self.log();
        (self.http_status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Turn foreign errors and missing values into [`TransmuteError`].
pub trait ErrorContext<T> {
    /// Internal error carrying `message`, keeping the original as source.
    fn context(self, message: impl Into<String>) -> Result<T>;

    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| TransmuteError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| TransmuteError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| TransmuteError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| TransmuteError::new(code, "Value missing"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for TransmuteError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorCode::DatabaseUnavailable
            }
            _ => ErrorCode::DatabaseError,
        };
        Self::with_internal(code, "Database operation failed", error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for TransmuteError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "Database migration failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for TransmuteError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<reqwest::Error> for TransmuteError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            ErrorCode::Timeout
        } else if error.is_builder() {
            ErrorCode::ConfigurationError
        } else {
            ErrorCode::ConversionServiceError
        };
        Self::with_internal(code, "Conversion service request failed", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for TransmuteError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for TransmuteError {
    fn from(error: std::io::Error) -> Self {
        let code = match error.kind() {
            std::io::ErrorKind::TimedOut => ErrorCode::Timeout,
            _ => ErrorCode::InternalError,
        };
        Self::with_internal(code, "I/O error", error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for TransmuteError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<TransmuteError>() {
            Ok(inner) => inner,
            Err(error) => Self::internal(format!("{:#}", error)),
        }
    }
}

impl From<config::ConfigError> for TransmuteError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(error.to_string()).with_source(error)
    }
}

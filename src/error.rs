//! Cellgate error types

use std::time::Duration;

use serde::Serialize;

/// A single input violation reported by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Input name as declared by the service.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Cellgate error types
#[derive(Debug, thiserror::Error)]
pub enum CellgateError {
    // Request errors, raised before any cache or lock is touched
    #[error("validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("missing or invalid token")]
    Unauthorized,

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    // Calculation errors
    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    #[error("invalid cell address: {0}")]
    InvalidAddress(String),

    /// Raw engine failure. Carries internal detail and is never shown to callers;
    /// the gateway converts it into [`CellgateError::Calculation`].
    #[error("engine error: {0}")]
    Engine(String),

    /// Sanitized calculation failure returned to callers.
    #[error("calculation failed for service {0}")]
    Calculation(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    // Infrastructure errors
    #[error("shared store error: {0}")]
    Store(String),

    #[error("remote table fetch failed: {0}")]
    TableFetch(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CellgateError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::SheetNotFound(_) => "SHEET_NOT_FOUND",
            Self::Engine(_) | Self::Calculation(_) => "CALCULATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidAddress(_)
            | Self::Store(_)
            | Self::TableFetch(_)
            | Self::Json(_)
            | Self::Configuration(_) => "INTERNAL_ERROR",
        }
    }

    /// Short remediation hint derived from the error category.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Validation(_) => "check the input names, types and ranges listed in details",
            Self::Unauthorized => "provide a valid token for this service",
            Self::NotFound(_) => "check the service id and make sure the service is published",
            Self::RateLimited { .. } => "wait before retrying or reduce the request rate",
            Self::SheetNotFound(_) | Self::InvalidAddress(_) => {
                "republish the service with cell addresses that match the workbook"
            }
            Self::Engine(_) | Self::Calculation(_) => {
                "verify the inputs; if the problem persists contact the service owner"
            }
            Self::Timeout(_) => "retry later; the calculation took too long",
            Self::Store(_) | Self::TableFetch(_) | Self::Json(_) | Self::Configuration(_) => {
                "retry later; if the problem persists contact the operator"
            }
        }
    }

    /// HTTP status an outer HTTP layer should use for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::RateLimited { .. } => 429,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Build the caller-facing error payload.
    ///
    /// Internal errors are reported with a generic message so that engine or
    /// store internals never leak to callers.
    pub fn to_response(&self) -> ErrorResponse {
        let (message, details) = match self {
            Self::Validation(issues) => (
                format!("{} input(s) failed validation", issues.len()),
                serde_json::to_value(issues).ok(),
            ),
            Self::RateLimited { retry_after } => (
                self.to_string(),
                Some(serde_json::json!({ "retryAfterMs": retry_after.as_millis() as u64 })),
            ),
            Self::Engine(_) => ("calculation failed".to_string(), None),
            Self::Store(_) | Self::TableFetch(_) | Self::Json(_) | Self::Configuration(_) => {
                ("internal error".to_string(), None)
            }
            other => (other.to_string(), None),
        };
        ErrorResponse {
            error: self.code().to_string(),
            message,
            details,
            suggestion: Some(self.suggestion().to_string()),
        }
    }

    /// Retry hint for rate-limited requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Caller-facing error payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Result type alias for Cellgate operations
pub type Result<T> = std::result::Result<T, CellgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_issue() {
        let err = CellgateError::Validation(vec![
            ValidationIssue::new("price", "is required"),
            ValidationIssue::new("qty", "must be a number"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("price: is required"));
        assert!(msg.contains("qty: must be a number"));

        let response = err.to_response();
        assert_eq!(response.error, "VALIDATION_ERROR");
        let details = response.details.unwrap();
        assert_eq!(details.as_array().unwrap().len(), 2);
    }

    #[test]
    fn engine_errors_are_sanitized() {
        let err = CellgateError::Engine("formula =SECRET!A1 blew up".into());
        let response = err.to_response();
        assert_eq!(response.error, "CALCULATION_ERROR");
        assert!(!response.message.contains("SECRET"));
    }

    #[test]
    fn every_error_has_a_suggestion() {
        let errors = [
            CellgateError::Unauthorized,
            CellgateError::NotFound("x".into()),
            CellgateError::SheetNotFound("Sheet9".into()),
            CellgateError::Store("down".into()),
        ];
        for err in errors {
            assert!(err.to_response().suggestion.is_some(), "{err}");
        }
    }

    #[test]
    fn malformed_address_is_internal_not_a_missing_sheet() {
        let err = CellgateError::InvalidAddress("Sheet1!ZZZZ1".into());
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert_eq!(err.http_status(), 500);
        assert_eq!(
            CellgateError::SheetNotFound("Ghost".into()).code(),
            "SHEET_NOT_FOUND"
        );
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = CellgateError::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(err.http_status(), 429);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
    }
}

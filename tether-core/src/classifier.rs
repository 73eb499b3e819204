//! Error classification
//!
//! Turns raw transport faults and HTTP statuses into [`AgentError`] values
//! with a stable [`ErrorCategory`], retry eligibility, an optional
//! retry-after hint and user-facing guidance. Classification is pure: the
//! same fault always yields the same category, retryability and hint.

use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Suggested delay after an internal timeout or a 504
pub const TIMEOUT_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Suggested delay after a socket-level failure
pub const NETWORK_RETRY_AFTER: Duration = Duration::from_secs(2);
/// Delay used for a 429 without a usable `Retry-After` header
pub const RATE_LIMIT_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Suggested delay after a 500
pub const SERVER_ERROR_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Suggested delay after a 503
pub const SERVICE_UNAVAILABLE_RETRY_AFTER: Duration = Duration::from_secs(30);

const CONTEXT_LENGTH_KEYWORDS: &[&str] = &[
    "context length",
    "context_length",
    "context window",
    "maximum context",
    "too many tokens",
    "max_tokens",
    "token limit",
    "tokens",
];

const CONTENT_POLICY_KEYWORDS: &[&str] = &[
    "content policy",
    "content_policy",
    "policy",
    "safety",
    "moderation",
    "content filter",
    "flagged",
];

/// Stable failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Unknown,
    Network,
    Timeout,
    RateLimit,
    Authentication,
    BadRequest,
    ServerError,
    ServiceUnavailable,
    Cancelled,
    ContentPolicy,
    ModelNotFound,
    ContextLengthExceeded,
    Serialization,
}

impl ErrorCategory {
    /// Whether failures in this category are worth retrying
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Timeout
                | Self::RateLimit
                | Self::ServerError
                | Self::ServiceUnavailable
        )
    }

    /// Short user-facing description
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Unknown => "An unexpected error occurred.",
            Self::Network => "Unable to reach the agent service.",
            Self::Timeout => "The request timed out.",
            Self::RateLimit => "Too many requests were sent.",
            Self::Authentication => "Authentication failed.",
            Self::BadRequest => "The request was rejected as invalid.",
            Self::ServerError => "The agent service encountered an error.",
            Self::ServiceUnavailable => "The agent service is temporarily unavailable.",
            Self::Cancelled => "The request was cancelled.",
            Self::ContentPolicy => "The request was blocked by the content policy.",
            Self::ModelNotFound => "The requested model was not found.",
            Self::ContextLengthExceeded => "The conversation is too long for the model.",
            Self::Serialization => "The response could not be processed.",
        }
    }

    /// What the user can do about it, if anything
    pub fn guidance(self) -> Option<&'static str> {
        match self {
            Self::Unknown | Self::Serialization => {
                Some("Try again. If the problem persists, contact support.")
            }
            Self::Network => Some(
                "Check your internet connection. Messages are delivered once the connection is restored.",
            ),
            Self::Timeout | Self::ServerError => Some("Try again in a few moments."),
            Self::RateLimit => Some("Wait a moment before sending another message."),
            Self::Authentication => Some("Check your API key or sign in again."),
            Self::BadRequest => Some("Check the message content and try again."),
            Self::ServiceUnavailable => {
                Some("The service may be under maintenance. Try again later.")
            }
            Self::ContentPolicy => Some("Rephrase your message and try again."),
            Self::ModelNotFound => Some("Check the model name in your configuration."),
            Self::ContextLengthExceeded => {
                Some("Start a new conversation or shorten your message.")
            }
            Self::Cancelled => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::BadRequest => "bad_request",
            Self::ServerError => "server_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Cancelled => "cancelled",
            Self::ContentPolicy => "content_policy",
            Self::ModelNotFound => "model_not_found",
            Self::ContextLengthExceeded => "context_length_exceeded",
            Self::Serialization => "serialization",
        };
        f.write_str(name)
    }
}

/// A classified failure
///
/// Built once per failure by [`classify`] or [`classify_status`] and never
/// mutated afterwards; fields are only reachable through accessors.
#[derive(Debug, Clone)]
pub struct AgentError {
    category: ErrorCategory,
    message: String,
    technical_details: String,
    is_retryable: bool,
    retry_after: Option<Duration>,
    actionable_guidance: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    http_status_code: Option<u16>,
    occurred_at: DateTime<Utc>,
}

impl AgentError {
    /// Create an error with the category's default message, guidance and
    /// retry eligibility
    pub fn new(category: ErrorCategory, technical_details: impl Into<String>) -> Self {
        Self {
            category,
            message: category.user_message().to_string(),
            technical_details: technical_details.into(),
            is_retryable: category.is_retryable(),
            retry_after: None,
            actionable_guidance: category.guidance().map(str::to_string),
            source: None,
            http_status_code: None,
            occurred_at: Utc::now(),
        }
    }

    pub(crate) fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.http_status_code = Some(status);
        self
    }

    pub(crate) fn with_source(mut self, source: TransportError) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// User-facing message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Diagnostic details, not meant for end users
    pub fn technical_details(&self) -> &str {
        &self.technical_details
    }

    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    /// Server-supplied or suggested delay before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn actionable_guidance(&self) -> Option<&str> {
        self.actionable_guidance.as_deref()
    }

    pub fn http_status_code(&self) -> Option<u16> {
        self.http_status_code
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns true for socket-level failures
    pub fn is_network(&self) -> bool {
        self.category == ErrorCategory::Network
    }

    pub fn is_cancelled(&self) -> bool {
        self.category == ErrorCategory::Cancelled
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.technical_details.is_empty() {
            write!(f, "{} ({})", self.message, self.category)
        } else {
            write!(
                f,
                "{} ({}): {}",
                self.message, self.category, self.technical_details
            )
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Classify a transport fault
///
/// `cancel` is the caller's own cancellation token. A
/// [`TransportError::Cancelled`] only counts as a caller cancellation when
/// that token has fired; otherwise something else (an internal deadline)
/// cancelled the operation and it is reported as a timeout.
pub fn classify(fault: &TransportError, cancel: Option<&CancellationToken>) -> AgentError {
    match fault {
        TransportError::Cancelled => {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                AgentError::new(ErrorCategory::Cancelled, "operation cancelled by caller")
                    .with_source(fault.clone())
            } else {
                AgentError::new(
                    ErrorCategory::Timeout,
                    "operation cancelled before the caller asked it to stop",
                )
                .with_retry_after(TIMEOUT_RETRY_AFTER)
                .with_source(fault.clone())
            }
        }
        TransportError::Timeout(details) => AgentError::new(ErrorCategory::Timeout, details)
            .with_retry_after(TIMEOUT_RETRY_AFTER)
            .with_source(fault.clone()),
        TransportError::Network(details) => AgentError::new(ErrorCategory::Network, details)
            .with_retry_after(NETWORK_RETRY_AFTER)
            .with_source(fault.clone()),
        TransportError::Serialization(details) => {
            AgentError::new(ErrorCategory::Serialization, details).with_source(fault.clone())
        }
        TransportError::Http {
            status,
            body,
            retry_after,
        } => classify_status(*status, body.as_deref(), retry_after.as_deref())
            .with_source(fault.clone()),
        TransportError::Other(details) => {
            AgentError::new(ErrorCategory::Unknown, details).with_source(fault.clone())
        }
    }
}

/// Classify an HTTP status code
///
/// `body` is inspected for 400 responses to tell context-length and
/// content-policy rejections apart from ordinary bad requests.
/// `retry_after` is the raw `Retry-After` header and only matters for 429.
pub fn classify_status(status: u16, body: Option<&str>, retry_after: Option<&str>) -> AgentError {
    let details = match body {
        Some(body) if !body.is_empty() => format!("HTTP {}: {}", status, body),
        _ => format!("HTTP {}", status),
    };

    let error = match status {
        400 => {
            let lowered = body.unwrap_or_default().to_lowercase();
            if contains_any(&lowered, CONTEXT_LENGTH_KEYWORDS) {
                AgentError::new(ErrorCategory::ContextLengthExceeded, details)
            } else if contains_any(&lowered, CONTENT_POLICY_KEYWORDS) {
                AgentError::new(ErrorCategory::ContentPolicy, details)
            } else {
                AgentError::new(ErrorCategory::BadRequest, details)
            }
        }
        401 | 403 => AgentError::new(ErrorCategory::Authentication, details),
        404 => AgentError::new(ErrorCategory::ModelNotFound, details),
        429 => {
            let delay = retry_after
                .and_then(|value| parse_retry_after(value, Utc::now()))
                .unwrap_or(RATE_LIMIT_RETRY_AFTER);
            AgentError::new(ErrorCategory::RateLimit, details).with_retry_after(delay)
        }
        500 => AgentError::new(ErrorCategory::ServerError, details)
            .with_retry_after(SERVER_ERROR_RETRY_AFTER),
        502 => AgentError::new(ErrorCategory::ServerError, details),
        503 => AgentError::new(ErrorCategory::ServiceUnavailable, details)
            .with_retry_after(SERVICE_UNAVAILABLE_RETRY_AFTER),
        504 => AgentError::new(ErrorCategory::Timeout, details)
            .with_retry_after(TIMEOUT_RETRY_AFTER),
        400..=499 => AgentError::new(ErrorCategory::BadRequest, details),
        500..=599 => AgentError::new(ErrorCategory::ServerError, details),
        _ => AgentError::new(ErrorCategory::Unknown, details),
    };

    error.with_status(status)
}

/// Parse a `Retry-After` header value
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retryable_categories() {
        let retryable = [
            ErrorCategory::Network,
            ErrorCategory::Timeout,
            ErrorCategory::RateLimit,
            ErrorCategory::ServiceUnavailable,
            ErrorCategory::ServerError,
        ];
        for category in retryable {
            assert!(category.is_retryable(), "{} should be retryable", category);
        }

        let permanent = [
            ErrorCategory::Authentication,
            ErrorCategory::BadRequest,
            ErrorCategory::ModelNotFound,
            ErrorCategory::Serialization,
            ErrorCategory::Cancelled,
            ErrorCategory::ContentPolicy,
            ErrorCategory::ContextLengthExceeded,
            ErrorCategory::Unknown,
        ];
        for category in permanent {
            assert!(!category.is_retryable(), "{} should not retry", category);
        }
    }

    #[test]
    fn test_caller_cancellation() {
        let token = CancellationToken::new();
        token.cancel();

        let err = classify(&TransportError::Cancelled, Some(&token));
        assert_eq!(err.category(), ErrorCategory::Cancelled);
        assert!(!err.is_retryable());
        assert!(err.retry_after().is_none());
    }

    #[test]
    fn test_cancellation_not_from_caller_is_timeout() {
        let token = CancellationToken::new();

        let err = classify(&TransportError::Cancelled, Some(&token));
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));

        let err = classify(&TransportError::Cancelled, None);
        assert_eq!(err.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_network_fault() {
        let err = classify(&TransportError::Network("connection reset".into()), None);
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert!(err.http_status_code().is_none());
        assert!(err.technical_details().contains("connection reset"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_serialization_fault() {
        let err = classify(&TransportError::Serialization("eof".into()), None);
        assert_eq!(err.category(), ErrorCategory::Serialization);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (400, ErrorCategory::BadRequest, false),
            (401, ErrorCategory::Authentication, false),
            (403, ErrorCategory::Authentication, false),
            (404, ErrorCategory::ModelNotFound, false),
            (409, ErrorCategory::BadRequest, false),
            (422, ErrorCategory::BadRequest, false),
            (429, ErrorCategory::RateLimit, true),
            (500, ErrorCategory::ServerError, true),
            (502, ErrorCategory::ServerError, true),
            (503, ErrorCategory::ServiceUnavailable, true),
            (504, ErrorCategory::Timeout, true),
            (507, ErrorCategory::ServerError, true),
            (302, ErrorCategory::Unknown, false),
        ];

        for (status, category, retryable) in cases {
            let err = classify_status(status, None, None);
            assert_eq!(err.category(), category, "status {}", status);
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
            assert_eq!(err.http_status_code(), Some(status));
        }
    }

    #[test]
    fn test_default_retry_after_hints() {
        assert_eq!(
            classify_status(429, None, None).retry_after(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            classify_status(500, None, None).retry_after(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(classify_status(502, None, None).retry_after(), None);
        assert_eq!(
            classify_status(503, None, None).retry_after(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            classify_status(504, None, None).retry_after(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_bad_request_keyword_overrides() {
        let err = classify_status(
            400,
            Some("This model's maximum context length is 8192 tokens"),
            None,
        );
        assert_eq!(err.category(), ErrorCategory::ContextLengthExceeded);
        assert!(!err.is_retryable());

        let err = classify_status(400, Some("Request flagged by Safety system"), None);
        assert_eq!(err.category(), ErrorCategory::ContentPolicy);
        assert!(!err.is_retryable());

        let err = classify_status(400, Some("missing field `model`"), None);
        assert_eq!(err.category(), ErrorCategory::BadRequest);
    }

    #[test]
    fn test_rate_limit_numeric_retry_after() {
        let err = classify_status(429, None, Some("45"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_rate_limit_garbage_retry_after_falls_back() {
        let err = classify_status(429, None, Some("soon"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        let delay = parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now);
        assert_eq!(delay, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_retry_after_past_date_is_zero() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 8, 0, 0).unwrap();
        let delay = parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now);
        assert_eq!(delay, Some(Duration::ZERO));
    }

    #[test]
    fn test_http_fault_goes_through_status_mapping() {
        let fault = TransportError::Http {
            status: 429,
            body: Some("slow down".into()),
            retry_after: Some("12".into()),
        };
        let err = classify(&fault, None);
        assert_eq!(err.category(), ErrorCategory::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert!(err.technical_details().contains("slow down"));
    }

    #[test]
    fn test_guidance_present_for_user_facing_failures() {
        let err = classify_status(401, None, None);
        assert_eq!(
            err.actionable_guidance(),
            Some("Check your API key or sign in again.")
        );
        assert_eq!(err.message(), "Authentication failed.");
    }

    #[test]
    fn test_display() {
        let err = classify_status(404, None, None);
        assert_eq!(
            err.to_string(),
            "The requested model was not found. (model_not_found): HTTP 404"
        );
    }
}

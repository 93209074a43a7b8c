//! Error Handling Module
//!
//! Defines the error taxonomy exposed to user code:
//! - `CallError`: everything the pipeline can fail with
//! - `ValidationDetail` / `ValidationIssue`: schema validation failures
//! - `ShapedError`: the user-facing error record in non-throwing result modes
//!
//! Classification is deterministic: every failure maps to exactly one
//! variant, and every variant maps to a stable `name()` string
//! (`HTTPError`, `ValidationError`, `AbortError`, `TimeoutError`,
//! `SyntaxError`, or the generic `Error`).

use crate::response::BufferedResponse;
use serde_json::Value;
use std::sync::Arc;

/// Result alias used throughout the crate.
pub type CallResult<T> = Result<T, CallError>;

/// Which part of the exchange a validation failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCause {
    Unknown,
    Data,
    ErrorData,
    Body,
    Headers,
    Params,
    Query,
    Method,
}

impl IssueCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Data => "data",
            Self::ErrorData => "errorData",
            Self::Body => "body",
            Self::Headers => "headers",
            Self::Params => "params",
            Self::Query => "query",
            Self::Method => "method",
        }
    }
}

/// A single path segment inside a validated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{k}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// One validator finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
    pub path: Vec<PathSegment>,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    pub fn at(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Render as `"<message> → at <dot.joined.path>"`; an empty path
    /// omits the suffix.
    pub fn format(&self) -> String {
        if self.path.is_empty() {
            self.message.clone()
        } else {
            let joined = self
                .path
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            format!("{} \u{2192} at {joined}", self.message)
        }
    }
}

/// Everything attached to a schema validation failure.
#[derive(Debug, Clone)]
pub struct ValidationDetail {
    pub issues: Vec<ValidationIssue>,
    pub cause: IssueCause,
    pub response: Option<BufferedResponse>,
}

impl ValidationDetail {
    pub fn new(issues: Vec<ValidationIssue>, cause: IssueCause) -> Self {
        Self {
            issues,
            cause,
            response: None,
        }
    }

    pub fn with_response(mut self, response: BufferedResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// One formatted line per issue.
    pub fn message(&self) -> String {
        self.issues
            .iter()
            .map(ValidationIssue::format)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Issues as a JSON value, used as `error_data` on shaped errors.
    pub fn issues_json(&self) -> Value {
        Value::Array(
            self.issues
                .iter()
                .map(|i| {
                    serde_json::json!({
                        "message": i.message,
                        "path": i.path.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }
}

impl std::fmt::Display for ValidationDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Why an abort fired. Kept separate from the message so dedupe cancels,
/// user aborts and timeouts classify deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// Aborted through a user-supplied signal or controller.
    User,
    /// Aborted by the dedupe engine replacing an in-flight request.
    Dedupe,
}

/// The pipeline error taxonomy.
///
/// `Clone` is required because deferred dedupe waiters share one
/// settlement; the original error object is therefore stored as text,
/// not as a source chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// Non-2xx HTTP response. Always carries the response.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        error_data: Option<Value>,
        response: BufferedResponse,
    },

    /// A schema validator rejected part of the exchange.
    #[error("{0}")]
    Validation(ValidationDetail),

    /// The combined signal aborted the pipeline.
    #[error("{message}")]
    Abort { message: String, kind: AbortKind },

    /// The timeout signal fired.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The response body could not be parsed.
    #[error("{message}")]
    Parse { message: String },

    /// The transport failed before a response arrived.
    #[error("{message}")]
    Network { message: String },

    /// Invalid configuration (bad URL, duplicate plugin id, bad header).
    #[error("{message}")]
    Config { message: String },

    /// Anything else, preserving the foreign error's name.
    #[error("{message}")]
    Other { name: String, message: String },
}

impl CallError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn other(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The stable error name exposed to user code.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Http { .. } => "HTTPError",
            Self::Validation(_) => "ValidationError",
            Self::Abort { .. } => "AbortError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Parse { .. } => "SyntaxError",
            Self::Network { .. } | Self::Config { .. } | Self::Other { .. } => "Error",
        }
    }

    /// HTTP status, when the error carries a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The response attached to this error, if any.
    pub fn response(&self) -> Option<&BufferedResponse> {
        match self {
            Self::Http { response, .. } => Some(response),
            Self::Validation(detail) => detail.response.as_ref(),
            _ => None,
        }
    }

    /// Default retry eligibility, used when no status-code list and no
    /// custom condition narrow it down: server-side and transport
    /// failures retry, everything else does not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Network { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Callback computing the HTTPError message when the error body carries
/// no `message` field.
pub type DefaultHttpErrorMessage =
    Arc<dyn Fn(&BufferedResponse, Option<&Value>) -> String + Send + Sync>;

/// Build the `Http` variant from a buffered non-2xx response.
///
/// Message precedence: `error_data.message` → configured fallback
/// callback → the response status text.
pub(crate) fn http_error(
    response: BufferedResponse,
    error_data: Option<Value>,
    fallback: Option<&DefaultHttpErrorMessage>,
) -> CallError {
    let message = error_data
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| fallback.map(|f| f(&response, error_data.as_ref())))
        .unwrap_or_else(|| response.status_text().to_owned());
    CallError::Http {
        status: response.status(),
        message,
        error_data,
        response,
    }
}

/// The user-facing error record produced in non-throwing result modes.
#[derive(Debug, Clone)]
pub struct ShapedError {
    /// `HTTPError`, `ValidationError`, `AbortError`, `TimeoutError`,
    /// `SyntaxError` or `Error`.
    pub name: String,
    pub message: String,
    /// HTTP error body for `HTTPError`, the issue list for
    /// `ValidationError`, absent otherwise.
    pub error_data: Option<Value>,
    /// The error that produced this record.
    pub original: CallError,
}

impl ShapedError {
    pub fn from_error(error: CallError) -> Self {
        let error_data = match &error {
            CallError::Http { error_data, .. } => error_data.clone(),
            CallError::Validation(detail) => Some(detail.issues_json()),
            _ => None,
        };
        Self {
            name: error.name().to_owned(),
            message: error.to_string(),
            error_data,
            original: error,
        }
    }
}

impl std::fmt::Display for ShapedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_format_joins_path_with_dots() {
        let issue = ValidationIssue::new("expected string").at(vec![
            PathSegment::Key("user".into()),
            PathSegment::Key("email".into()),
        ]);
        assert_eq!(issue.format(), "expected string \u{2192} at user.email");
    }

    #[test]
    fn issue_format_omits_suffix_for_empty_path() {
        let issue = ValidationIssue::new("invalid payload");
        assert_eq!(issue.format(), "invalid payload");
    }

    #[test]
    fn issue_format_renders_indices() {
        let issue = ValidationIssue::new("too short").at(vec![
            PathSegment::Key("items".into()),
            PathSegment::Index(2),
            PathSegment::Key("name".into()),
        ]);
        assert_eq!(issue.format(), "too short \u{2192} at items.2.name");
    }

    #[test]
    fn error_names_are_stable() {
        let detail = ValidationDetail::new(vec![ValidationIssue::new("x")], IssueCause::Body);
        assert_eq!(CallError::Validation(detail).name(), "ValidationError");
        assert_eq!(CallError::Timeout { ms: 5 }.name(), "TimeoutError");
        assert_eq!(
            CallError::Abort {
                message: "stop".into(),
                kind: AbortKind::User
            }
            .name(),
            "AbortError"
        );
        assert_eq!(CallError::parse("bad json").name(), "SyntaxError");
        assert_eq!(CallError::network("refused").name(), "Error");
    }

    #[test]
    fn timeout_message_is_deterministic() {
        let err = CallError::Timeout { ms: 750 };
        assert_eq!(err.to_string(), "Request timed out after 750ms");
    }

    #[test]
    fn retryable_covers_server_and_transport_failures() {
        assert!(CallError::network("reset").is_retryable());
        assert!(CallError::Timeout { ms: 1 }.is_retryable());
        assert!(!CallError::parse("eof").is_retryable());
        assert!(
            !CallError::Abort {
                message: "user".into(),
                kind: AbortKind::User
            }
            .is_retryable()
        );
    }

    #[test]
    fn shaped_error_carries_validation_issues_as_error_data() {
        let detail = ValidationDetail::new(
            vec![ValidationIssue::new("required").at(vec![PathSegment::Key("email".into())])],
            IssueCause::Body,
        );
        let shaped = ShapedError::from_error(CallError::Validation(detail));
        assert_eq!(shaped.name, "ValidationError");
        assert!(shaped.message.contains("at email"));
        let data = shaped.error_data.expect("issues json");
        assert_eq!(data[0]["message"], "required");
    }
}

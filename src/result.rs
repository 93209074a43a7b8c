//! Result shaping.
//!
//! The orchestrator always computes the full `{data, error, response}`
//! shape internally; [`ResultMode`] decides what the caller sees.
//! Throwing modes surface the raw [`CallError`]; the others always
//! return a [`CallOutcome`] whose `error` is `None` exactly on success.

use crate::error::{CallError, CallResult, ShapedError};
use crate::response::BufferedResponse;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// How the call result is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// `{data, error, response}` (the default).
    #[default]
    All,
    /// Like `All`, but errors are returned as `Err(CallError)`.
    AllWithException,
    /// Only the parsed data; see [`CallOutcome::only_data`].
    OnlyData,
    /// `{data, error}`; see [`CallOutcome::only_success`].
    OnlySuccess,
    /// Data or `Err(CallError)`.
    OnlySuccessWithException,
    /// Only the response; see [`CallOutcome::only_response`].
    OnlyResponse,
    /// Response or `Err(CallError)`.
    OnlyResponseWithException,
    /// The raw response, bypassing parsing and data/error-data schema
    /// validation. Request-side validators still run.
    FetchApi,
    /// `{data, error}` without the response.
    WithoutResponse,
}

impl ResultMode {
    pub(crate) fn throws(&self) -> bool {
        matches!(
            self,
            Self::AllWithException | Self::OnlySuccessWithException | Self::OnlyResponseWithException
        )
    }

    /// Modes that skip body decoding and payload validation.
    pub(crate) fn bypasses_parsing(&self) -> bool {
        matches!(self, Self::FetchApi)
    }

    /// Modes whose outcome omits the raw response.
    pub(crate) fn drops_response(&self) -> bool {
        matches!(self, Self::WithoutResponse)
    }
}

/// Whether errors throw instead of folding into the outcome. The
/// predicate form may itself fail; that error supersedes.
#[derive(Clone)]
pub enum ThrowOnError {
    Bool(bool),
    Predicate(Arc<dyn Fn(&CallError) -> CallResult<bool> + Send + Sync>),
}

impl Default for ThrowOnError {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl std::fmt::Debug for ThrowOnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<bool> for ThrowOnError {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl ThrowOnError {
    /// Decide for a concrete error. A failing predicate propagates its
    /// own error, superseding the original.
    pub(crate) fn decide(&self, error: &CallError) -> CallResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Predicate(f) => f(error),
        }
    }
}

/// The shaped result of one call: exactly one of `data` / `error` is
/// set; `response` accompanies both unless the mode drops it.
#[derive(Debug, Clone)]
pub struct CallOutcome<T> {
    pub data: Option<T>,
    pub error: Option<ShapedError>,
    pub response: Option<BufferedResponse>,
}

impl<T> CallOutcome<T> {
    pub(crate) fn success(data: T, response: Option<BufferedResponse>) -> Self {
        Self {
            data: Some(data),
            error: None,
            response,
        }
    }

    pub(crate) fn failure(error: ShapedError, response: Option<BufferedResponse>) -> Self {
        Self {
            data: None,
            error: Some(error),
            response,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The `onlyData` view.
    pub fn only_data(self) -> Option<T> {
        self.data
    }

    /// The `onlySuccess` view: `(data, error)` without the response.
    pub fn only_success(self) -> (Option<T>, Option<ShapedError>) {
        (self.data, self.error)
    }

    /// The `onlyResponse` view.
    pub fn only_response(self) -> Option<BufferedResponse> {
        self.response
    }

    /// Convert into `Result`, for callers who prefer `?` over the
    /// record shape.
    pub fn into_result(self) -> CallResult<(T, Option<BufferedResponse>)> {
        match (self.data, self.error) {
            (Some(data), None) => Ok((data, self.response)),
            (_, Some(error)) => Err(error.original),
            (None, None) => Err(CallError::other("Error", "outcome carried neither data nor error")),
        }
    }
}

/// Decode the parsed JSON payload into the caller's type.
///
/// `Null` decodes through `T::deserialize`, so `Value`, `Option<_>`
/// and unit-ish types accept byte-less modes (`Stream`, `FetchApi`)
/// naturally.
pub(crate) fn decode_data<T: DeserializeOwned>(value: Value) -> CallResult<T> {
    serde_json::from_value(value).map_err(|e| CallError::parse(format!("data decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct User {
        id: u32,
    }

    #[test]
    fn outcome_has_exactly_one_of_data_and_error() {
        let ok: CallOutcome<Value> = CallOutcome::success(json!(1), None);
        assert!(ok.data.is_some() && ok.error.is_none());

        let err: CallOutcome<Value> = CallOutcome::failure(
            ShapedError::from_error(CallError::network("down")),
            None,
        );
        assert!(err.data.is_none() && err.error.is_some());
    }

    #[test]
    fn decode_into_concrete_type() {
        let user: User = decode_data(json!({"id": 7})).unwrap();
        assert_eq!(user, User { id: 7 });
    }

    #[test]
    fn decode_failure_is_a_syntax_error() {
        let err = decode_data::<User>(json!({"id": "seven"})).unwrap_err();
        assert_eq!(err.name(), "SyntaxError");
    }

    #[test]
    fn null_decodes_into_value_and_option() {
        let v: Value = decode_data(Value::Null).unwrap();
        assert!(v.is_null());
        let o: Option<User> = decode_data(Value::Null).unwrap();
        assert!(o.is_none());
    }

    #[test]
    fn throw_on_error_predicate_failure_supersedes() {
        let throw = ThrowOnError::Predicate(Arc::new(|_| {
            Err(CallError::other("Error", "predicate exploded"))
        }));
        let err = throw.decide(&CallError::network("down")).unwrap_err();
        assert!(err.to_string().contains("predicate exploded"));
    }

    #[test]
    fn into_result_unwraps_success_and_propagates_errors() {
        let ok: CallOutcome<Value> = CallOutcome::success(json!("d"), None);
        assert!(ok.into_result().is_ok());

        let err: CallOutcome<Value> =
            CallOutcome::failure(ShapedError::from_error(CallError::Timeout { ms: 9 }), None);
        assert_eq!(err.into_result().unwrap_err().name(), "TimeoutError");
    }
}

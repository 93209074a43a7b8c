//! Request body handling.
//!
//! Serializes the configured body and infers `Content-Type`:
//! - JSON values serialize via serde (or a custom `body_serializer`,
//!   which then sets no Content-Type automatically) and default both
//!   `Content-Type` and `Accept` to `application/json`;
//! - text shaped like `k=v&k2=v2` gets `application/x-www-form-urlencoded`;
//! - bytes, form pairs, multipart and streams pass through.
//!
//! Multipart forms and streams are held as factories so a retry can
//! rebuild them from scratch.

use crate::error::{CallError, CallResult};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

/// Custom serializer for JSON bodies. When set, it owns the wire format
/// and no Content-Type is inferred.
pub type BodySerializer = Arc<dyn Fn(&Value) -> CallResult<String> + Send + Sync>;

/// Factory for a multipart form; invoked per attempt.
pub type MultipartFactory =
    Arc<dyn Fn() -> CallResult<reqwest::multipart::Form> + Send + Sync>;

/// Factory for a streaming body; invoked per attempt.
pub type StreamFactory =
    Arc<dyn Fn() -> BoxStream<'static, CallResult<Bytes>> + Send + Sync>;

/// The body as configured by the caller.
#[derive(Clone)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    Bytes(Bytes),
    /// Form pairs, urlencoded on the wire.
    Form(Vec<(String, String)>),
    Multipart(MultipartFactory),
    Stream {
        make: StreamFactory,
        total_bytes: Option<u64>,
    },
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Form(pairs) => f.debug_tuple("Form").field(pairs).finish(),
            Self::Multipart(_) => f.write_str("Multipart(..)"),
            Self::Stream { total_bytes, .. } => {
                write!(f, "Stream {{ total_bytes: {total_bytes:?} }}")
            }
        }
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// The body ready for dispatch.
pub(crate) enum PreparedBody {
    None,
    Bytes {
        bytes: Bytes,
        content_type: Option<&'static str>,
        /// Default `Accept: application/json` unless already set.
        accept_json: bool,
    },
    Multipart(MultipartFactory),
    Stream {
        make: StreamFactory,
        total_bytes: Option<u64>,
    },
}

impl PreparedBody {
    /// The serialized form that feeds the dedupe fingerprint. Multipart
    /// and stream bodies have no stable serialization and contribute
    /// `null`.
    pub(crate) fn fingerprint_value(&self) -> Value {
        match self {
            Self::Bytes { bytes, .. } => {
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => Value::Null,
        }
    }
}

/// Text in `k=v&k2=v2` shape, which the wire treats as a urlencoded
/// form body.
pub(crate) fn looks_like_query_string(text: &str) -> bool {
    !text.is_empty()
        && !text.chars().any(char::is_whitespace)
        && text.split('&').all(|pair| {
            let mut parts = pair.splitn(2, '=');
            matches!((parts.next(), parts.next()), (Some(k), Some(_)) if !k.is_empty())
        })
}

fn urlencode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Serialize the configured body.
pub(crate) fn prepare_body(
    body: Option<&RequestBody>,
    serializer: Option<&BodySerializer>,
) -> CallResult<PreparedBody> {
    let Some(body) = body else {
        return Ok(PreparedBody::None);
    };
    match body {
        RequestBody::Json(value) => {
            if let Some(serializer) = serializer {
                let text = serializer(value)?;
                return Ok(PreparedBody::Bytes {
                    bytes: Bytes::from(text),
                    content_type: None,
                    accept_json: false,
                });
            }
            let text = serde_json::to_string(value)
                .map_err(|e| CallError::config(format!("body serialization failed: {e}")))?;
            Ok(PreparedBody::Bytes {
                bytes: Bytes::from(text),
                content_type: Some("application/json"),
                accept_json: true,
            })
        }
        RequestBody::Text(text) => {
            let content_type = looks_like_query_string(text)
                .then_some("application/x-www-form-urlencoded");
            Ok(PreparedBody::Bytes {
                bytes: Bytes::copy_from_slice(text.as_bytes()),
                content_type,
                accept_json: false,
            })
        }
        RequestBody::Bytes(bytes) => Ok(PreparedBody::Bytes {
            bytes: bytes.clone(),
            content_type: None,
            accept_json: false,
        }),
        RequestBody::Form(pairs) => Ok(PreparedBody::Bytes {
            bytes: Bytes::from(urlencode_pairs(pairs)),
            content_type: Some("application/x-www-form-urlencoded"),
            accept_json: false,
        }),
        RequestBody::Multipart(factory) => Ok(PreparedBody::Multipart(Arc::clone(factory))),
        RequestBody::Stream { make, total_bytes } => Ok(PreparedBody::Stream {
            make: Arc::clone(make),
            total_bytes: *total_bytes,
        }),
    }
}

/// The JSON view of the configured body, used by schema validation.
/// Non-JSON bodies validate as `null`.
pub(crate) fn body_as_value(body: Option<&RequestBody>) -> Value {
    match body {
        Some(RequestBody::Json(value)) => value.clone(),
        Some(RequestBody::Text(text)) => Value::String(text.clone()),
        _ => Value::Null,
    }
}

/// Substitute a validator-transformed JSON body back into the request.
pub(crate) fn apply_transformed_body(body: &mut Option<RequestBody>, transformed: Value) {
    if matches!(body, Some(RequestBody::Json(_))) {
        *body = Some(RequestBody::Json(transformed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body_sets_json_content_type() {
        let body = RequestBody::Json(json!({"a": 1}));
        match prepare_body(Some(&body), None).unwrap() {
            PreparedBody::Bytes {
                bytes,
                content_type,
                accept_json,
            } => {
                assert_eq!(&bytes[..], br#"{"a":1}"#);
                assert_eq!(content_type, Some("application/json"));
                assert!(accept_json);
            }
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn custom_serializer_owns_the_wire_format() {
        let serializer: BodySerializer = Arc::new(|v| Ok(format!("wrapped:{v}")));
        let body = RequestBody::Json(json!(1));
        match prepare_body(Some(&body), Some(&serializer)).unwrap() {
            PreparedBody::Bytes {
                bytes,
                content_type,
                accept_json,
            } => {
                assert_eq!(&bytes[..], b"wrapped:1");
                assert!(content_type.is_none());
                assert!(!accept_json);
            }
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn query_shaped_text_is_form_urlencoded() {
        assert!(looks_like_query_string("a=1&b=2"));
        assert!(looks_like_query_string("a="));
        assert!(!looks_like_query_string("plain text"));
        assert!(!looks_like_query_string("{\"a\":1}"));
        assert!(!looks_like_query_string(""));

        let body = RequestBody::Text("k=v&k2=v2".into());
        match prepare_body(Some(&body), None).unwrap() {
            PreparedBody::Bytes { content_type, .. } => {
                assert_eq!(content_type, Some("application/x-www-form-urlencoded"));
            }
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn plain_text_sets_no_content_type() {
        let body = RequestBody::Text("hello world".into());
        match prepare_body(Some(&body), None).unwrap() {
            PreparedBody::Bytes { content_type, .. } => assert!(content_type.is_none()),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn form_pairs_are_urlencoded() {
        let body = RequestBody::Form(vec![("q".into(), "a b".into())]);
        match prepare_body(Some(&body), None).unwrap() {
            PreparedBody::Bytes { bytes, .. } => assert_eq!(&bytes[..], b"q=a%20b"),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn fingerprint_ignores_stream_bodies() {
        let body = RequestBody::Stream {
            make: Arc::new(|| Box::pin(futures_util::stream::empty())),
            total_bytes: None,
        };
        let prepared = prepare_body(Some(&body), None).unwrap();
        assert!(prepared.fingerprint_value().is_null());
    }
}

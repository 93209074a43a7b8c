//! Response representation and parsing.
//!
//! The middleware chain produces a [`RawResponse`], whose body may still
//! be an open network stream. The orchestrator drains it (fanning chunks
//! out to `on_response_stream`) into a [`BufferedResponse`], which is
//! cheaply cloneable; that is what deferred dedupe waiters and
//! `clone_response` readers receive, and what errors carry.

use crate::error::{CallError, CallResult};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// How the response body is decoded into `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Parse the body as JSON (the default).
    #[default]
    Json,
    /// Keep the body as text.
    Text,
    /// Keep the body as raw bytes.
    Bytes,
    /// Skip decoding; the body is observed chunk-wise through
    /// `on_response_stream` and stays available on the buffered response.
    Stream,
}

/// Custom parser operating on the textual body, overriding
/// [`ResponseType`]-driven decoding.
pub type ResponseParser = Arc<dyn Fn(&str) -> CallResult<Value> + Send + Sync>;

/// A response whose body may still be streaming from the network.
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: String,
    pub body: RawBody,
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .field("body", &self.body)
            .finish()
    }
}

pub enum RawBody {
    /// Already in memory: produced by short-circuiting middlewares and
    /// synthetic fetch implementations.
    Buffered(Bytes),
    /// Still on the wire.
    Stream(BoxStream<'static, CallResult<Bytes>>),
}

impl std::fmt::Debug for RawBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawBody::Buffered(bytes) => f.debug_tuple("Buffered").field(bytes).finish(),
            RawBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl RawResponse {
    /// Build an in-memory response, e.g. from a short-circuiting
    /// middleware. It still flows through parsing and schema validation.
    pub fn buffered(
        status: StatusCode,
        headers: HeaderMap,
        url: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            status,
            headers,
            url: url.into(),
            body: RawBody::Buffered(body.into()),
        }
    }

    /// Shorthand for a 200 JSON response.
    pub fn json(url: impl Into<String>, value: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        Self::buffered(
            StatusCode::OK,
            headers,
            url,
            serde_json::to_vec(value).unwrap_or_default(),
        )
    }

    pub fn from_reqwest(response: reqwest::Response) -> Self {
        use futures_util::StreamExt;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| CallError::network(e.to_string())))
            .boxed();
        Self {
            status,
            headers,
            url,
            body: RawBody::Stream(stream),
        }
    }

    /// Declared body length, when the server sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}

/// A fully-read response. Cloning is cheap (`Bytes` is refcounted).
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: String,
    body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, url: String, body: Bytes) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status code.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Unknown Status")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> CallResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| CallError::parse(e.to_string()))
    }
}

/// Decode the body according to the response type, or hand it to the
/// custom parser when one is configured.
///
/// `Stream` yields `Value::Null`: its chunks were already delivered to
/// `on_response_stream` while buffering, and the raw bytes stay readable
/// on the buffered response itself.
pub(crate) fn parse_body(
    response: &BufferedResponse,
    response_type: ResponseType,
    parser: Option<&ResponseParser>,
) -> CallResult<Value> {
    if let Some(parser) = parser {
        return parser(&response.text());
    }
    match response_type {
        ResponseType::Json => {
            if response.body().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_slice(response.body()).map_err(|e| CallError::parse(e.to_string()))
        }
        ResponseType::Text => Ok(Value::String(response.text())),
        ResponseType::Bytes => Ok(Value::Array(
            response
                .body()
                .iter()
                .map(|b| Value::Number((*b).into()))
                .collect(),
        )),
        ResponseType::Stream => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffered(body: &str) -> BufferedResponse {
        BufferedResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            "https://example.test/x".into(),
            Bytes::copy_from_slice(body.as_bytes()),
        )
    }

    #[test]
    fn parse_json_body() {
        let value = parse_body(&buffered(r#"{"id":1}"#), ResponseType::Json, None).unwrap();
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn empty_json_body_parses_to_null() {
        let value = parse_body(&buffered(""), ResponseType::Json, None).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let err = parse_body(&buffered("{nope"), ResponseType::Json, None).unwrap_err();
        assert_eq!(err.name(), "SyntaxError");
    }

    #[test]
    fn text_body_keeps_raw_text() {
        let value = parse_body(&buffered("plain"), ResponseType::Text, None).unwrap();
        assert_eq!(value, Value::String("plain".into()));
    }

    #[test]
    fn custom_parser_overrides_response_type() {
        let parser: ResponseParser =
            Arc::new(|text| Ok(Value::String(text.to_uppercase())));
        let value = parse_body(&buffered("ok"), ResponseType::Json, Some(&parser)).unwrap();
        assert_eq!(value, Value::String("OK".into()));
    }

    #[test]
    fn clones_share_the_same_body() {
        let original = buffered("shared");
        let clone = original.clone();
        assert_eq!(original.body(), clone.body());
        assert_eq!(clone.text(), "shared");
    }
}

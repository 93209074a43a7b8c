//! Transfer progress for streaming bodies.
//!
//! Request `Stream` bodies are wrapped into a transparent counting
//! stream that reports every chunk to `on_request_stream`. Response
//! bodies are drained chunk-by-chunk, each chunk fanned out to
//! `on_response_stream`, while accumulating into the buffered body
//! that feeds parsing, so observation and parsing share one read.

use crate::error::{CallError, CallResult};
use crate::hooks::{CallContext, HookRegistry};
use crate::response::{BufferedResponse, RawBody, RawResponse};
use crate::signal::AbortSignal;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// One progress observation.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub transferred_bytes: u64,
    /// Declared or tracked total. When the total is unknown it trails
    /// `transferred_bytes`, so `progress()` only reaches 100 on the
    /// final chunk.
    pub total_bytes: u64,
    pub chunk: Bytes,
}

impl StreamEvent {
    /// Percent complete, clamped to 0..=100.
    pub fn progress(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let pct = self.transferred_bytes.saturating_mul(100) / self.total_bytes;
        pct.min(100) as u8
    }
}

/// Wrap a request body stream so every chunk emits `on_request_stream`.
///
/// `total_bytes` comes from an explicit size or the Content-Length
/// header; without one the total is tracked as
/// `max(total, transferred)`.
pub(crate) fn instrument_request_stream(
    inner: BoxStream<'static, CallResult<Bytes>>,
    total_bytes: Option<u64>,
    hooks: HookRegistry,
    ctx: Arc<CallContext>,
) -> BoxStream<'static, CallResult<Bytes>> {
    let stream = async_stream::stream! {
        let mut inner = inner;
        let mut transferred: u64 = 0;
        let declared = total_bytes;
        while let Some(chunk) = inner.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            transferred += chunk.len() as u64;
            let event = StreamEvent {
                transferred_bytes: transferred,
                total_bytes: declared.unwrap_or(0).max(transferred),
                chunk: chunk.clone(),
            };
            if let Err(e) = hooks
                .dispatch(|h| Box::pin(h.on_request_stream(&ctx, &event)))
                .await
            {
                yield Err(e);
                return;
            }
            yield Ok(chunk);
        }
    };
    Box::pin(stream)
}

/// Pre-drain a request stream to learn its exact size, for callers that
/// opted into `forcefully_calculate_request_stream_size`.
pub(crate) async fn drain_stream_size(
    mut stream: BoxStream<'static, CallResult<Bytes>>,
) -> CallResult<(Bytes, u64)> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    let total = buf.len() as u64;
    Ok((buf.freeze(), total))
}

/// Read the raw response to completion, reporting every chunk to
/// `on_response_stream`, and return the buffered response that feeds
/// parsing. Stream failures surface as generic errors on the result
/// path; aborts are re-checked between chunks.
pub(crate) async fn buffer_response(
    raw: RawResponse,
    hooks: &HookRegistry,
    ctx: &CallContext,
    signal: &AbortSignal,
) -> CallResult<BufferedResponse> {
    let declared = raw.content_length();
    let RawResponse {
        status,
        headers,
        url,
        body,
    } = raw;

    let body = match body {
        RawBody::Buffered(bytes) => {
            if !hooks.is_empty() && !bytes.is_empty() {
                let event = StreamEvent {
                    transferred_bytes: bytes.len() as u64,
                    total_bytes: declared.unwrap_or(bytes.len() as u64),
                    chunk: bytes.clone(),
                };
                hooks
                    .dispatch(|h| Box::pin(h.on_response_stream(ctx, &event)))
                    .await?;
            }
            bytes
        }
        RawBody::Stream(mut stream) => {
            let mut buf = BytesMut::new();
            let mut transferred: u64 = 0;
            while let Some(chunk) = stream.next().await {
                signal.check()?;
                let chunk =
                    chunk.map_err(|e| CallError::network(format!("response stream failed: {e}")))?;
                transferred += chunk.len() as u64;
                if !hooks.is_empty() {
                    let event = StreamEvent {
                        transferred_bytes: transferred,
                        total_bytes: declared.unwrap_or(0).max(transferred),
                        chunk: chunk.clone(),
                    };
                    hooks
                        .dispatch(|h| Box::pin(h.on_response_stream(ctx, &event)))
                        .await?;
                }
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    };

    Ok(BufferedResponse::new(status, headers, url, body))
}

//! Fetch middleware.
//!
//! A middleware wraps the dispatch: it may rewrite the outgoing
//! request, observe or replace the response, or short-circuit by
//! returning a [`RawResponse`] without calling `next`. Downstream
//! middlewares and the terminal fetch are then skipped, but the
//! response still flows through parsing and schema validation.
//!
//! Composition, outermost first: per-request → client → plugins in
//! registration order → the terminal fetch (a custom [`Fetch`] or the
//! built-in `reqwest` dispatch).

use crate::body::{MultipartFactory, StreamFactory};
use crate::error::{CallError, CallResult};
use crate::hooks::{CallContext, HookRegistry};
use crate::response::RawResponse;
use crate::signal::AbortSignal;
use crate::stream::{drain_stream_size, instrument_request_stream};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH};
use std::sync::Arc;

/// The request as middlewares see it.
pub struct FetchRequest {
    /// Uppercase verb.
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub(crate) body: DispatchBody,
}

/// The body, ready for the terminal fetch.
pub(crate) enum DispatchBody {
    None,
    Bytes(Bytes),
    Multipart(MultipartFactory),
    Stream {
        make: StreamFactory,
        total_bytes: Option<u64>,
        force_size: bool,
        hooks: HookRegistry,
        ctx: Arc<CallContext>,
    },
}

impl FetchRequest {
    /// The in-memory body bytes, when the body is not a form or stream.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            DispatchBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// The terminal dispatch contract. Supply your own to replace the
/// network layer (the `custom fetch` seam).
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> CallResult<RawResponse>;
}

/// One layer around the dispatch.
#[async_trait]
pub trait FetchMiddleware: Send + Sync {
    async fn handle(&self, request: FetchRequest, next: Next<'_>) -> CallResult<RawResponse>;
}

/// The remainder of the chain. Call [`Next::run`] to continue inward;
/// drop it to short-circuit.
pub struct Next<'a> {
    chain: &'a [Arc<dyn FetchMiddleware>],
    terminal: &'a dyn Fetch,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: FetchRequest) -> CallResult<RawResponse> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.handle(
                    request,
                    Next {
                        chain: rest,
                        terminal: self.terminal,
                    },
                )
                .await
            }
            None => self.terminal.fetch(request).await,
        }
    }
}

/// Run `request` through `chain` (outermost first) down to `terminal`.
pub(crate) async fn execute_chain(
    chain: &[Arc<dyn FetchMiddleware>],
    terminal: &dyn Fetch,
    request: FetchRequest,
) -> CallResult<RawResponse> {
    Next { chain, terminal }.run(request).await
}

/// The built-in terminal: dispatch over `reqwest`, racing the combined
/// abort signal.
pub(crate) struct ReqwestFetch {
    pub client: reqwest::Client,
    pub signal: AbortSignal,
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> CallResult<RawResponse> {
        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| CallError::config(format!("invalid method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(request.headers.clone());

        builder = match request.body {
            DispatchBody::None => builder,
            DispatchBody::Bytes(bytes) => builder.body(bytes),
            DispatchBody::Multipart(factory) => builder.multipart(factory()?),
            DispatchBody::Stream {
                make,
                total_bytes,
                force_size,
                hooks,
                ctx,
            } => {
                let header_total = request
                    .headers
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let declared = total_bytes.or(header_total);

                let (stream, declared) = if declared.is_none() && force_size {
                    let (bytes, total) = drain_stream_size(make()).await?;
                    let single: futures_util::stream::Iter<
                        std::vec::IntoIter<CallResult<Bytes>>,
                    > = futures_util::stream::iter(vec![Ok(bytes)]);
                    (
                        Box::pin(single) as futures_util::stream::BoxStream<'static, CallResult<Bytes>>,
                        Some(total),
                    )
                } else {
                    (make(), declared)
                };

                let instrumented = instrument_request_stream(stream, declared, hooks, ctx);
                let mut builder = builder.body(reqwest::Body::wrap_stream(instrumented));
                if header_total.is_none() {
                    if let Some(total) = declared {
                        builder = builder.header(CONTENT_LENGTH, HeaderValue::from(total));
                    }
                }
                builder
            }
        };

        tracing::trace!(
            target: "callwire::fetch",
            url = %request.url,
            "dispatching"
        );

        tokio::select! {
            _ = self.signal.aborted() => Err(self.signal.abort_error()),
            result = builder.send() => match result {
                Ok(response) => Ok(RawResponse::from_reqwest(response)),
                Err(e) => {
                    // A cancelled connection surfaces as a transport
                    // error; prefer the signal's reason when it fired.
                    if self.signal.is_aborted() {
                        Err(self.signal.abort_error())
                    } else {
                        Err(CallError::network(e.to_string()))
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::AbortController;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    fn request(url: &str) -> FetchRequest {
        FetchRequest {
            method: "GET".into(),
            url: url.into(),
            headers: HeaderMap::new(),
            body: DispatchBody::None,
        }
    }

    struct SyntheticFetch {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl Fetch for SyntheticFetch {
        async fn fetch(&self, request: FetchRequest) -> CallResult<RawResponse> {
            *self.calls.lock().unwrap() += 1;
            Ok(RawResponse::buffered(
                StatusCode::OK,
                HeaderMap::new(),
                request.url,
                Bytes::from_static(b"terminal"),
            ))
        }
    }

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FetchMiddleware for Tag {
        async fn handle(&self, request: FetchRequest, next: Next<'_>) -> CallResult<RawResponse> {
            self.log.lock().unwrap().push(format!("{}:before", self.label));
            let response = next.run(request).await?;
            self.log.lock().unwrap().push(format!("{}:after", self.label));
            Ok(response)
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl FetchMiddleware for ShortCircuit {
        async fn handle(&self, request: FetchRequest, _next: Next<'_>) -> CallResult<RawResponse> {
            Ok(RawResponse::buffered(
                StatusCode::OK,
                HeaderMap::new(),
                request.url,
                Bytes::from_static(b"synthetic"),
            ))
        }
    }

    #[tokio::test]
    async fn chain_runs_outside_in_and_unwinds_inside_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn FetchMiddleware>> = vec![
            Arc::new(Tag {
                label: "outer",
                log: log.clone(),
            }),
            Arc::new(Tag {
                label: "inner",
                log: log.clone(),
            }),
        ];
        let terminal = SyntheticFetch {
            calls: Mutex::new(0),
        };
        let response = execute_chain(&chain, &terminal, request("https://x/a"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
        assert_eq!(*terminal.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream_and_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn FetchMiddleware>> = vec![
            Arc::new(ShortCircuit),
            Arc::new(Tag {
                label: "unreached",
                log: log.clone(),
            }),
        ];
        let terminal = SyntheticFetch {
            calls: Mutex::new(0),
        };
        let response = execute_chain(&chain, &terminal, request("https://x/a"))
            .await
            .unwrap();
        match response.body {
            crate::response::RawBody::Buffered(bytes) => assert_eq!(&bytes[..], b"synthetic"),
            _ => panic!("expected buffered body"),
        }
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(*terminal.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_chain_hits_the_terminal_directly() {
        let terminal = SyntheticFetch {
            calls: Mutex::new(0),
        };
        execute_chain(&[], &terminal, request("https://x/a"))
            .await
            .unwrap();
        assert_eq!(*terminal.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn pre_aborted_signal_rejects_before_dispatch() {
        let controller = AbortController::new();
        controller.abort(crate::signal::AbortReason::user("stop"));
        let fetch = ReqwestFetch {
            client: reqwest::Client::new(),
            signal: controller.signal(),
        };
        // The URL is never contacted: the select sees the aborted
        // signal on the first poll.
        let err = fetch
            .fetch(request("http://127.0.0.1:9/never"))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "AbortError");
    }
}

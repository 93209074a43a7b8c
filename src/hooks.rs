//! Lifecycle hooks.
//!
//! The hook set is fixed: `on_request`, `on_request_ready`,
//! `on_request_error`, `on_request_stream`, `on_response`,
//! `on_response_stream`, `on_response_error`, `on_success`, `on_error`,
//! `on_validation_error`, `on_retry`. Implement [`CallHooks`] and
//! override what you need; every method defaults to a no-op.
//!
//! Per event, hooks run plugin-registered first (in plugin registration
//! order), then the client's, then the per-request one. `Sequential`
//! mode awaits each in order and a failure halts the chain; `Parallel`
//! launches all at once and reports the first failure in registration
//! order. A hook failure supersedes the active result and takes the
//! error path.

use crate::body::RequestBody;
use crate::error::{CallError, CallResult, ValidationDetail};
use crate::response::BufferedResponse;
use crate::stream::StreamEvent;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a hook set executes within one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookMode {
    #[default]
    Sequential,
    Parallel,
}

/// The mutable request slice hooks may edit before dispatch.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
}

/// Shared context handed to every hook of one call attempt.
///
/// `request` and `meta` are live: assignments made in `on_request`
/// are what gets dispatched. They sit behind locks so `Parallel` hook
/// sets stay expressible.
#[derive(Debug)]
pub struct CallContext {
    /// Correlation id, unique per attempt.
    pub request_id: String,
    /// The URL as passed by the caller, method prefix stripped.
    pub init_url: String,
    /// The resolved dispatch URL.
    pub full_url: String,
    /// The resolved verb, uppercase.
    pub method: String,
    /// Zero-based attempt count (`0` = original try).
    pub attempt: u32,
    /// Live request parts, dispatched after `on_request` returns.
    pub request: Mutex<RequestParts>,
    /// Free-form metadata shared across hooks of one call.
    pub meta: Mutex<Value>,
}

impl CallContext {
    /// Convenience: set one outgoing header.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.request
            .lock()
            .expect("request parts poisoned")
            .headers
            .insert(name.into(), value.into());
    }
}

/// Lifecycle callbacks. All methods default to no-ops.
#[async_trait]
pub trait CallHooks: Send + Sync {
    /// Before dispatch; the request parts are still mutable.
    async fn on_request(&self, _ctx: &CallContext) -> CallResult<()> {
        Ok(())
    }

    /// After the final request is assembled, immediately before the
    /// middleware chain runs.
    async fn on_request_ready(&self, _ctx: &CallContext) -> CallResult<()> {
        Ok(())
    }

    /// Per chunk of a streaming request body.
    async fn on_request_stream(&self, _ctx: &CallContext, _event: &StreamEvent) -> CallResult<()> {
        Ok(())
    }

    /// Per chunk of the response body.
    async fn on_response_stream(&self, _ctx: &CallContext, _event: &StreamEvent) -> CallResult<()> {
        Ok(())
    }

    /// Any settled response, success or error. `data` is `None` for
    /// HTTP errors.
    async fn on_response(
        &self,
        _ctx: &CallContext,
        _response: &BufferedResponse,
        _data: Option<&Value>,
    ) -> CallResult<()> {
        Ok(())
    }

    /// A 2xx response whose payload passed validation.
    async fn on_success(
        &self,
        _ctx: &CallContext,
        _response: &BufferedResponse,
        _data: &Value,
    ) -> CallResult<()> {
        Ok(())
    }

    /// The request never produced a response (network, abort, timeout).
    async fn on_request_error(&self, _ctx: &CallContext, _error: &CallError) -> CallResult<()> {
        Ok(())
    }

    /// A response arrived but classified as an error.
    async fn on_response_error(
        &self,
        _ctx: &CallContext,
        _response: &BufferedResponse,
        _error: &CallError,
    ) -> CallResult<()> {
        Ok(())
    }

    /// A schema validator rejected part of the exchange.
    async fn on_validation_error(
        &self,
        _ctx: &CallContext,
        _detail: &ValidationDetail,
    ) -> CallResult<()> {
        Ok(())
    }

    /// Every error, after the specific error hook.
    async fn on_error(&self, _ctx: &CallContext, _error: &CallError) -> CallResult<()> {
        Ok(())
    }

    /// A retry was scheduled; fires after the delay, before re-entry.
    async fn on_retry(
        &self,
        _ctx: &CallContext,
        _error: &CallError,
        _next_attempt: u32,
    ) -> CallResult<()> {
        Ok(())
    }
}

/// The ordered hook entries for one call, plus the execution mode.
#[derive(Clone, Default)]
pub(crate) struct HookRegistry {
    entries: Vec<Arc<dyn CallHooks>>,
    mode: HookMode,
}

impl HookRegistry {
    pub(crate) fn new(entries: Vec<Arc<dyn CallHooks>>, mode: HookMode) -> Self {
        Self { entries, mode }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run one event across all entries.
    ///
    /// Parallel mode joins everything, then reports the first failure
    /// in registration order, deterministic even when several hooks
    /// fail in the same poll.
    pub(crate) async fn dispatch<'a, F>(&'a self, event: F) -> CallResult<()>
    where
        F: Fn(&'a dyn CallHooks) -> BoxFuture<'a, CallResult<()>>,
    {
        match self.mode {
            HookMode::Sequential => {
                for hooks in &self.entries {
                    event(hooks.as_ref()).await?;
                }
                Ok(())
            }
            HookMode::Parallel => {
                let futures: Vec<_> =
                    self.entries.iter().map(|h| event(h.as_ref())).collect();
                let results = futures::future::join_all(futures).await;
                for result in results {
                    result?;
                }
                Ok(())
            }
        }
    }
}

/// Ready-made hooks that log the request lifecycle through `tracing`,
/// without touching payloads.
#[derive(Debug, Clone, Default)]
pub struct LoggingHooks;

#[async_trait]
impl CallHooks for LoggingHooks {
    async fn on_request(&self, ctx: &CallContext) -> CallResult<()> {
        tracing::debug!(
            target: "callwire::http",
            request_id = %ctx.request_id,
            method = %ctx.method,
            url = %ctx.full_url,
            attempt = ctx.attempt,
            "sending request"
        );
        Ok(())
    }

    async fn on_response(
        &self,
        ctx: &CallContext,
        response: &BufferedResponse,
        _data: Option<&Value>,
    ) -> CallResult<()> {
        tracing::debug!(
            target: "callwire::http",
            request_id = %ctx.request_id,
            url = %ctx.full_url,
            status = response.status(),
            "response received"
        );
        Ok(())
    }

    async fn on_error(&self, ctx: &CallContext, error: &CallError) -> CallResult<()> {
        tracing::debug!(
            target: "callwire::http",
            request_id = %ctx.request_id,
            url = %ctx.full_url,
            err = %error,
            "request error"
        );
        Ok(())
    }

    async fn on_retry(
        &self,
        ctx: &CallContext,
        error: &CallError,
        next_attempt: u32,
    ) -> CallResult<()> {
        tracing::debug!(
            target: "callwire::http",
            request_id = %ctx.request_id,
            url = %ctx.full_url,
            err = %error,
            next_attempt,
            "retrying request"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CallContext {
        CallContext {
            request_id: "test".into(),
            init_url: "/x".into(),
            full_url: "https://example.test/x".into(),
            method: "GET".into(),
            attempt: 0,
            request: Mutex::new(RequestParts::default()),
            meta: Mutex::new(Value::Null),
        }
    }

    struct Recorder {
        order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl CallHooks for Recorder {
        async fn on_request(&self, _ctx: &CallContext) -> CallResult<()> {
            self.order.lock().unwrap().push(self.label);
            if self.fail {
                Err(CallError::other("Error", format!("{} failed", self.label)))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn sequential_runs_in_order_and_halts_on_failure() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(
            vec![
                Arc::new(Recorder {
                    order: order.clone(),
                    label: "first",
                    fail: false,
                }),
                Arc::new(Recorder {
                    order: order.clone(),
                    label: "second",
                    fail: true,
                }),
                Arc::new(Recorder {
                    order: order.clone(),
                    label: "third",
                    fail: false,
                }),
            ],
            HookMode::Sequential,
        );
        let ctx = context();
        let err = registry
            .dispatch(|h| Box::pin(h.on_request(&ctx)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("second failed"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn parallel_runs_all_and_reports_first_registered_failure() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::new(
            vec![
                Arc::new(Recorder {
                    order: order.clone(),
                    label: "a",
                    fail: false,
                }),
                Arc::new(Recorder {
                    order: order.clone(),
                    label: "b",
                    fail: true,
                }),
                Arc::new(Recorder {
                    order: order.clone(),
                    label: "c",
                    fail: true,
                }),
            ],
            HookMode::Parallel,
        );
        let ctx = context();
        let err = registry
            .dispatch(|h| Box::pin(h.on_request(&ctx)))
            .await
            .unwrap_err();
        // Both b and c failed; b registered first, so b wins.
        assert!(err.to_string().contains("b failed"));
        assert_eq!(order.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn hooks_mutate_the_live_request_parts() {
        struct AddHeader;
        #[async_trait]
        impl CallHooks for AddHeader {
            async fn on_request(&self, ctx: &CallContext) -> CallResult<()> {
                ctx.set_header("x-trace", "1");
                Ok(())
            }
        }
        let registry = HookRegistry::new(vec![Arc::new(AddHeader)], HookMode::Sequential);
        let ctx = context();
        registry
            .dispatch(|h| Box::pin(h.on_request(&ctx)))
            .await
            .unwrap();
        assert_eq!(
            ctx.request.lock().unwrap().headers.get("x-trace"),
            Some(&"1".to_string())
        );
    }
}

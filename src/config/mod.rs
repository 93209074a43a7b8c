//! Call configuration.
//!
//! Two overlay layers (the client's base config and the per-request
//! config), each carrying two disjoint slices: [`RequestOptions`] (the
//! verb, headers, body, signal) and the extra options on
//! [`CallOptions`] (base URL, auth, retry, hooks, plugins, schema,
//! result mode, dedupe, …). Merging is shallow per slice; see
//! [`SkipAutoMerge`] for taking a slice wholesale.

mod merge;

pub use merge::SkipAutoMerge;
pub(crate) use merge::merge_options;

use crate::auth::Auth;
use crate::body::{BodySerializer, RequestBody};
use crate::dedupe::{DedupeScope, DedupeStrategy};
use crate::error::DefaultHttpErrorMessage;
use crate::hooks::{CallHooks, HookMode};
use crate::middleware::{Fetch, FetchMiddleware};
use crate::plugin::PluginsOption;
use crate::response::{ResponseParser, ResponseType};
use crate::result::{ResultMode, ThrowOnError};
use crate::retry::RetryPolicy;
use crate::schema::SchemaConfig;
use crate::signal::AbortSignal;
use crate::url::{Params, Query};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The request slice: what actually goes on the wire.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Explicit verb; wins over a `@<method>/` URL prefix.
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
    /// Caller-supplied abort surface.
    pub signal: Option<AbortSignal>,
}

/// The extra-options slice plus the request slice: everything a call
/// can configure.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub request: RequestOptions,
    pub base_url: Option<String>,
    pub auth: Option<Auth>,
    pub params: Option<Params>,
    pub query: Option<Query>,
    pub retry: Option<RetryPolicy>,
    pub hooks: Option<Arc<dyn CallHooks>>,
    pub hook_mode: Option<HookMode>,
    pub plugins: Option<PluginsOption>,
    pub schema: Option<SchemaConfig>,
    pub result_mode: Option<ResultMode>,
    pub timeout_ms: Option<u64>,
    pub response_type: Option<ResponseType>,
    pub response_parser: Option<ResponseParser>,
    pub body_serializer: Option<BodySerializer>,
    pub dedupe_strategy: Option<DedupeStrategy>,
    pub dedupe_key: Option<String>,
    pub dedupe_scope: Option<DedupeScope>,
    pub clone_response: Option<bool>,
    pub throw_on_error: Option<ThrowOnError>,
    pub meta: Option<Value>,
    /// Per-request middleware, outermost in the chain.
    pub middleware: Option<Arc<dyn FetchMiddleware>>,
    /// Replacement for the terminal fetch.
    pub fetch: Option<Arc<dyn Fetch>>,
    pub default_http_error_message: Option<DefaultHttpErrorMessage>,
    pub skip_auto_merge_for: Option<SkipAutoMerge>,
    /// Pre-drain sizeless request streams to learn their length.
    pub force_stream_size: Option<bool>,
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("request", &self.request)
            .field("base_url", &self.base_url)
            .field("has_auth", &self.auth.is_some())
            .field("result_mode", &self.result_mode)
            .field("timeout_ms", &self.timeout_ms)
            .field("dedupe_strategy", &self.dedupe_strategy)
            .field("has_retry", &self.retry.is_some())
            .field("has_hooks", &self.hooks.is_some())
            .field("has_schema", &self.schema.is_some())
            .finish_non_exhaustive()
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.request.method = Some(method.into().to_ascii_uppercase());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.request.body = Some(body);
        self
    }

    pub fn with_json(mut self, value: Value) -> Self {
        self.request.body = Some(RequestBody::Json(value));
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.request.signal = Some(signal);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_auth(mut self, auth: impl Into<Auth>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn CallHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_hook_mode(mut self, mode: HookMode) -> Self {
        self.hook_mode = Some(mode);
        self
    }

    pub fn with_plugins(mut self, plugins: PluginsOption) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = Some(mode);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn with_response_parser(mut self, parser: ResponseParser) -> Self {
        self.response_parser = Some(parser);
        self
    }

    pub fn with_body_serializer(mut self, serializer: BodySerializer) -> Self {
        self.body_serializer = Some(serializer);
        self
    }

    pub fn with_dedupe_strategy(mut self, strategy: DedupeStrategy) -> Self {
        self.dedupe_strategy = Some(strategy);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_dedupe_scope(mut self, scope: DedupeScope) -> Self {
        self.dedupe_scope = Some(scope);
        self
    }

    pub fn with_clone_response(mut self, clone: bool) -> Self {
        self.clone_response = Some(clone);
        self
    }

    pub fn with_throw_on_error(mut self, throw: impl Into<ThrowOnError>) -> Self {
        self.throw_on_error = Some(throw.into());
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn FetchMiddleware>) -> Self {
        self.middleware = Some(middleware);
        self
    }

    pub fn with_fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_default_http_error_message(mut self, f: DefaultHttpErrorMessage) -> Self {
        self.default_http_error_message = Some(f);
        self
    }

    pub fn with_skip_auto_merge_for(mut self, skip: SkipAutoMerge) -> Self {
        self.skip_auto_merge_for = Some(skip);
        self
    }

    pub fn with_force_stream_size(mut self, force: bool) -> Self {
        self.force_stream_size = Some(force);
        self
    }

    /// Fill unset fields from a lower-priority layer (plugin defaults).
    /// Headers merge additively: existing keys win.
    pub(crate) fn fill_from(&mut self, lower: &CallOptions) {
        for (k, v) in &lower.request.headers {
            self.request
                .headers
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        macro_rules! fill {
            ($($field:ident).+) => {
                if self.$($field).+.is_none() {
                    self.$($field).+ = lower.$($field).+.clone();
                }
            };
        }
        fill!(request.method);
        fill!(request.body);
        fill!(request.signal);
        fill!(base_url);
        fill!(auth);
        fill!(params);
        fill!(query);
        fill!(retry);
        fill!(hooks);
        fill!(hook_mode);
        fill!(schema);
        fill!(result_mode);
        fill!(timeout_ms);
        fill!(response_type);
        fill!(response_parser);
        fill!(body_serializer);
        fill!(dedupe_strategy);
        fill!(dedupe_key);
        fill!(dedupe_scope);
        fill!(clone_response);
        fill!(throw_on_error);
        fill!(meta);
        fill!(middleware);
        fill!(fetch);
        fill!(default_http_error_message);
        fill!(force_stream_size);
    }

    /// Overlay a plugin setup patch: fields the patch sets replace the
    /// current values.
    pub(crate) fn overlay_some(&mut self, patch: CallOptions) {
        for (k, v) in patch.request.headers {
            self.request.headers.insert(k, v);
        }
        macro_rules! take {
            ($($field:ident).+) => {
                if patch.$($field).+.is_some() {
                    self.$($field).+ = patch.$($field).+;
                }
            };
        }
        take!(request.method);
        take!(request.body);
        take!(request.signal);
        take!(base_url);
        take!(auth);
        take!(params);
        take!(query);
        take!(retry);
        take!(hooks);
        take!(hook_mode);
        take!(schema);
        take!(result_mode);
        take!(timeout_ms);
        take!(response_type);
        take!(response_parser);
        take!(body_serializer);
        take!(dedupe_strategy);
        take!(dedupe_key);
        take!(dedupe_scope);
        take!(clone_response);
        take!(throw_on_error);
        take!(meta);
        take!(middleware);
        take!(fetch);
        take!(default_http_error_message);
        take!(force_stream_size);
    }
}

//! The client and the request orchestrator.
//!
//! [`CallClient`] holds the base config, the shared `reqwest` client
//! and the client-local dedupe registry. One call runs the full
//! pipeline: merge configs → initialize plugins → resolve URL, headers
//! and body → validate → register the dedupe key → `on_request` → apply
//! schema transforms → build the middleware chain → dispatch → buffer
//! and parse → validate → success hooks → shape the result. Errors
//! branch to the catch path: classify → error hooks → retry decision →
//! re-enter or shape.

use crate::body::{PreparedBody, body_as_value, prepare_body};
use crate::config::{CallOptions, merge_options};
use crate::dedupe::{
    DedupeDecision, DedupeScope, DedupeStrategy, Registry, fingerprint, global_registry,
    new_local_registry, register,
};
use crate::error::{
    CallError, CallResult, DefaultHttpErrorMessage, IssueCause, ShapedError, http_error,
};
use crate::hooks::{CallContext, CallHooks, HookRegistry, RequestParts};
use crate::middleware::{
    DispatchBody, Fetch, FetchMiddleware, FetchRequest, ReqwestFetch, execute_chain,
};
use crate::plugin::{CallPlugin, PluginRuntime, initialize, resolve_plugins};
use crate::response::{BufferedResponse, ResponseParser, ResponseType, parse_body};
use crate::result::{CallOutcome, ResultMode, ThrowOnError, decode_data};
use crate::retry::{RetryPolicy, wait_for_retry};
use crate::schema::{RouteSchema, apply_validator, resolve_route};
use crate::signal::{AbortController, AbortSignal, combine_signals, timeout_signal};
use crate::stream::buffer_response;
use crate::url::{ResolvedUrl, resolve_url};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Computes the base config from the first request's init URL.
pub type BaseConfigFn = Arc<dyn Fn(&str) -> CallOptions + Send + Sync>;

/// Builder for [`CallClient`].
#[derive(Default)]
pub struct ClientBuilder {
    http: Option<reqwest::Client>,
    base: CallOptions,
    base_fn: Option<BaseConfigFn>,
    plugins: Vec<Arc<dyn CallPlugin>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply a pre-configured `reqwest` client (connection pool,
    /// proxies, TLS settings).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// The base config every call merges under.
    pub fn base_config(mut self, base: CallOptions) -> Self {
        self.base = base;
        self
    }

    /// Compute the base config lazily from the first request's init
    /// URL; cached afterwards.
    pub fn base_config_fn(mut self, f: BaseConfigFn) -> Self {
        self.base_fn = Some(f);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base.base_url = Some(base_url.into());
        self
    }

    /// Register a plugin. Registration order is hook and middleware
    /// order.
    pub fn plugin(mut self, plugin: Arc<dyn CallPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn build(mut self) -> CallClient {
        // Plugins declared on the base config join the builder's list.
        if let Some(crate::plugin::PluginsOption::List(list)) = self.base.plugins.take() {
            self.plugins.extend(list);
        }
        CallClient {
            http: self.http.unwrap_or_default(),
            base: self.base,
            base_fn: self.base_fn,
            base_cache: OnceLock::new(),
            base_plugins: self.plugins,
            local_dedupe: new_local_registry(),
        }
    }
}

/// The typed HTTP client.
pub struct CallClient {
    http: reqwest::Client,
    base: CallOptions,
    base_fn: Option<BaseConfigFn>,
    base_cache: OnceLock<CallOptions>,
    base_plugins: Vec<Arc<dyn CallPlugin>>,
    local_dedupe: Registry,
}

struct AttemptSuccess {
    data: Value,
    response: BufferedResponse,
    result_mode: ResultMode,
    throw_on_error: ThrowOnError,
}

struct AttemptFailure {
    error: CallError,
    hooks: HookRegistry,
    ctx: Arc<CallContext>,
    signal: AbortSignal,
    retry: Option<RetryPolicy>,
    method: String,
    result_mode: ResultMode,
    throw_on_error: ThrowOnError,
}

/// Everything `process_response` needs besides the response itself.
struct ResponsePlan<'a> {
    route: Option<&'a RouteSchema>,
    response_type: ResponseType,
    parser: Option<&'a ResponseParser>,
    default_http_error_message: Option<&'a DefaultHttpErrorMessage>,
    disable_output_application: bool,
    result_mode: ResultMode,
}

impl CallClient {
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn effective_base(&self, init_url: &str) -> &CallOptions {
        match &self.base_fn {
            Some(f) => self.base_cache.get_or_init(|| f(init_url)),
            None => &self.base,
        }
    }

    /// Run one call through the full pipeline, retrying per the
    /// effective policy. In non-throwing modes the returned outcome
    /// carries either data or a shaped error, never both.
    pub async fn call<T: DeserializeOwned>(
        &self,
        init_url: &str,
        options: CallOptions,
    ) -> CallResult<CallOutcome<T>> {
        let base = self.effective_base(init_url).clone();
        let mut attempt: u32 = 0;
        loop {
            match self.execute_attempt(init_url, &base, &options, attempt).await {
                Ok(success) => {
                    let AttemptSuccess {
                        data,
                        response,
                        result_mode,
                        throw_on_error,
                    } = *success;
                    return match decode_data::<T>(data) {
                        Ok(data) => {
                            let response =
                                (!result_mode.drops_response()).then_some(response);
                            Ok(CallOutcome::success(data, response))
                        }
                        Err(error) => {
                            shape_error(error, result_mode, &throw_on_error)
                        }
                    };
                }
                Err(failure) => {
                    let failure = *failure;
                    let policy = failure.retry.clone().unwrap_or_default();
                    if policy
                        .eligible(&failure.signal, attempt, &failure.method, &failure.error)
                        .await
                    {
                        let next_attempt = attempt + 1;
                        match wait_for_retry(&policy, next_attempt, &failure.signal).await {
                            Ok(()) => {
                                let retried = failure
                                    .hooks
                                    .dispatch(|h| {
                                        Box::pin(h.on_retry(
                                            &failure.ctx,
                                            &failure.error,
                                            next_attempt,
                                        ))
                                    })
                                    .await;
                                if let Err(hook_error) = retried {
                                    return shape_error(
                                        hook_error,
                                        failure.result_mode,
                                        &failure.throw_on_error,
                                    );
                                }
                                attempt = next_attempt;
                                continue;
                            }
                            Err(abort) => {
                                return shape_error(
                                    abort,
                                    failure.result_mode,
                                    &failure.throw_on_error,
                                );
                            }
                        }
                    }
                    return shape_error(
                        failure.error,
                        failure.result_mode,
                        &failure.throw_on_error,
                    );
                }
            }
        }
    }

    /// `call` with untyped JSON data.
    pub async fn call_value(
        &self,
        init_url: &str,
        options: CallOptions,
    ) -> CallResult<CallOutcome<Value>> {
        self.call(init_url, options).await
    }

    pub async fn get<T: DeserializeOwned>(&self, init_url: &str) -> CallResult<CallOutcome<T>> {
        self.call(init_url, CallOptions::new().with_method("GET")).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        init_url: &str,
        body: Value,
    ) -> CallResult<CallOutcome<T>> {
        self.call(init_url, CallOptions::new().with_method("POST").with_json(body))
            .await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        init_url: &str,
        body: Value,
    ) -> CallResult<CallOutcome<T>> {
        self.call(init_url, CallOptions::new().with_method("PUT").with_json(body))
            .await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        init_url: &str,
        body: Value,
    ) -> CallResult<CallOutcome<T>> {
        self.call(init_url, CallOptions::new().with_method("PATCH").with_json(body))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, init_url: &str) -> CallResult<CallOutcome<T>> {
        self.call(init_url, CallOptions::new().with_method("DELETE")).await
    }

    /// One pipeline entry. A failure has already been through the
    /// error hooks; retry is decided by the caller.
    async fn execute_attempt(
        &self,
        init_url: &str,
        base: &CallOptions,
        request_options: &CallOptions,
        attempt: u32,
    ) -> Result<Box<AttemptSuccess>, Box<AttemptFailure>> {
        // 1. Merge configs. The only place skip_auto_merge_for applies.
        let mut effective = merge_options(base, request_options);
        let result_mode = effective.result_mode.unwrap_or_default();
        let throw_on_error = effective.throw_on_error.clone().unwrap_or_default();

        let hook_entries = |plugin_hooks: &[Arc<dyn CallHooks>]| {
            let mut entries: Vec<Arc<dyn CallHooks>> = plugin_hooks.to_vec();
            if let Some(h) = &base.hooks {
                entries.push(Arc::clone(h));
            }
            if let Some(h) = &request_options.hooks {
                entries.push(Arc::clone(h));
            }
            entries
        };

        // 2. Plugin runtime: list composition, setup chain, defaults
        //    and schema layering.
        let plugin_list = resolve_plugins(&self.base_plugins, request_options.plugins.as_ref());
        let (runtime, init_url) =
            match initialize(plugin_list, init_url.to_owned(), &mut effective).await {
                Ok(out) => out,
                Err(error) => {
                    // No resolved URL yet; synthesize a context so the
                    // error hooks still fire.
                    let mode = effective.hook_mode.unwrap_or_default();
                    let hooks = HookRegistry::new(hook_entries(&[]), mode);
                    let ctx = Arc::new(make_context(
                        init_url,
                        init_url,
                        "GET",
                        attempt,
                        &effective,
                    ));
                    let signal = combine_signals([effective.request.signal.clone()]);
                    return Err(self
                        .fail(error, hooks, ctx, signal, &effective, result_mode, throw_on_error)
                        .await);
                }
            };

        let mode = effective.hook_mode.unwrap_or_default();
        let hooks = HookRegistry::new(hook_entries(&runtime.hooks), mode);

        // 3. Resolve URL and verb. An explicit method beats the URL
        //    prefix.
        let resolved = resolve_url(
            &init_url,
            effective.base_url.as_deref(),
            effective.params.as_ref(),
            effective.query.as_ref(),
        );
        let method = effective
            .request
            .method
            .clone()
            .or_else(|| resolved.method_from_url.clone())
            .unwrap_or_else(|| "GET".to_owned());

        let ctx = Arc::new(make_context(
            &resolved.normalized_init_url,
            &resolved.full_url,
            &method,
            attempt,
            &effective,
        ));

        // 4. Abort surface: user signal + timeout + this attempt's own
        //    controller (discarded on retry re-entry).
        let internal = AbortController::new();
        let signal = combine_signals([
            effective.request.signal.clone(),
            timeout_signal(effective.timeout_ms),
            Some(internal.signal()),
        ]);

        match self
            .run_pipeline(
                &effective, &runtime, &resolved, &method, &hooks, &ctx, &signal, &internal,
                request_options, base, result_mode,
            )
            .await
        {
            Ok((data, response)) => Ok(Box::new(AttemptSuccess {
                data,
                response,
                result_mode,
                throw_on_error,
            })),
            Err(error) => Err(self
                .fail(error, hooks, ctx, signal, &effective, result_mode, throw_on_error)
                .await),
        }
    }

    /// The catch path: run the error hooks (a hook failure supersedes
    /// the active error, once) and package the failure for the retry
    /// decision.
    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        error: CallError,
        hooks: HookRegistry,
        ctx: Arc<CallContext>,
        signal: AbortSignal,
        effective: &CallOptions,
        result_mode: ResultMode,
        throw_on_error: ThrowOnError,
    ) -> Box<AttemptFailure> {
        let error = run_error_hooks(&hooks, &ctx, error).await;
        tracing::debug!(
            target: "callwire::client",
            request_id = %ctx.request_id,
            url = %ctx.full_url,
            error = %error,
            name = error.name(),
            "call attempt failed"
        );
        Box::new(AttemptFailure {
            error,
            hooks,
            method: ctx.method.clone(),
            ctx,
            signal,
            retry: effective.retry.clone(),
            result_mode,
            throw_on_error,
        })
    }

    /// Steps between config resolution and the shaped payload. Any
    /// error routes to the catch path in `execute_attempt`.
    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        effective: &CallOptions,
        runtime: &PluginRuntime,
        resolved: &ResolvedUrl,
        method: &str,
        hooks: &HookRegistry,
        ctx: &Arc<CallContext>,
        signal: &AbortSignal,
        internal: &AbortController,
        request_options: &CallOptions,
        base: &CallOptions,
        result_mode: ResultMode,
    ) -> CallResult<(Value, BufferedResponse)> {
        // 5. Authorization header, unless one is already present.
        if let Some(auth) = &effective.auth {
            if let Some(value) = auth.header_value().await? {
                let mut parts = ctx.request.lock().expect("request parts poisoned");
                let already_set = parts
                    .headers
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case("authorization"));
                if !already_set {
                    parts.headers.insert("Authorization".into(), value);
                }
            }
        }
        signal.check()?;

        // 6. Serialize the body once for fingerprinting and
        //    content-type inference.
        let body_snapshot = ctx
            .request
            .lock()
            .expect("request parts poisoned")
            .body
            .clone();
        let prepared = prepare_body(body_snapshot.as_ref(), effective.body_serializer.as_ref())?;
        apply_inferred_headers(ctx, &prepared);

        // 7. Pre-dispatch schema validation. Transformed body/headers
        //    are held until after on_request.
        let schema = effective.schema.as_ref();
        let route = match schema {
            Some(config) => resolve_route(config, method, &resolved.normalized_init_url)?.cloned(),
            None => None,
        };
        let disable_transform = schema.map(|s| s.disable_runtime_transform).unwrap_or(false);
        let disable_output = schema.map(|s| s.disable_output_application).unwrap_or(false);

        let mut body_transform: Option<Value> = None;
        let mut headers_transform: Option<Value> = None;
        if let Some(route) = &route {
            if let Some(validator) = &route.method {
                apply_validator(
                    validator,
                    &Value::String(method.to_owned()),
                    IssueCause::Method,
                    None,
                )
                .await?;
            }
            if let Some(validator) = &route.params {
                let value = params_as_value(effective);
                apply_validator(validator, &value, IssueCause::Params, None).await?;
            }
            if let Some(validator) = &route.query {
                let value = query_as_value(effective);
                apply_validator(validator, &value, IssueCause::Query, None).await?;
            }
            if let Some(validator) = &route.headers {
                let value = headers_as_value(ctx);
                let out = apply_validator(validator, &value, IssueCause::Headers, None).await?;
                headers_transform = Some(out);
            }
            if let Some(validator) = &route.body {
                let value = body_as_value(body_snapshot.as_ref());
                let out = apply_validator(validator, &value, IssueCause::Body, None).await?;
                body_transform = Some(out);
            }
            signal.check()?;
        }

        // 8. Dedupe registration: before hook execution, after URL and
        //    body resolution.
        let strategy = effective.dedupe_strategy.unwrap_or_default();
        let key = match strategy {
            DedupeStrategy::None => None,
            _ => Some(effective.dedupe_key.clone().unwrap_or_else(|| {
                let headers: Vec<(String, String)> = ctx
                    .request
                    .lock()
                    .expect("request parts poisoned")
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                fingerprint(
                    &resolved.full_url,
                    method,
                    &prepared.fingerprint_value(),
                    &headers,
                )
            })),
        };
        let registry = match effective.dedupe_scope.unwrap_or_default() {
            DedupeScope::Global => global_registry(),
            DedupeScope::Local => Arc::clone(&self.local_dedupe),
        };
        let decision = register(&registry, key.as_deref(), strategy, internal);

        let plan = ResponsePlan {
            route: route.as_ref(),
            response_type: effective.response_type.unwrap_or_default(),
            parser: effective.response_parser.as_ref(),
            default_http_error_message: effective.default_http_error_message.as_ref(),
            disable_output_application: disable_output,
            result_mode,
        };

        let mut guard = match decision {
            DedupeDecision::Defer(settlement) => {
                // Await the originating dispatch's settlement; parse
                // against a clone of the same response.
                let response = tokio::select! {
                    _ = signal.aborted() => Err(signal.abort_error()),
                    result = settlement => result,
                }?;
                return self.process_response(response, &plan, hooks, ctx, signal).await;
            }
            DedupeDecision::Proceed(guard) => guard,
        };

        let dispatched = async {
            // 9. on_request: the last point where hooks mutate the
            //    outgoing request.
            hooks.dispatch(|h| Box::pin(h.on_request(ctx))).await?;
            signal.check()?;

            // 10. Apply held schema transforms.
            if !disable_transform {
                let mut parts = ctx.request.lock().expect("request parts poisoned");
                if let Some(value) = body_transform {
                    crate::body::apply_transformed_body(&mut parts.body, value);
                }
                if let Some(Value::Object(map)) = headers_transform {
                    parts.headers = map
                        .into_iter()
                        .map(|(k, v)| {
                            let v = match v {
                                Value::String(s) => s,
                                other => other.to_string(),
                            };
                            (k, v)
                        })
                        .collect();
                }
            }

            // 11. Final assembly from the (possibly mutated) live
            //     parts.
            let parts = ctx
                .request
                .lock()
                .expect("request parts poisoned")
                .clone();
            let prepared =
                prepare_body(parts.body.as_ref(), effective.body_serializer.as_ref())?;
            let mut header_map = build_header_map(&parts.headers)?;
            default_body_headers(&mut header_map, &prepared);
            let dispatch_body = match prepared {
                PreparedBody::None => DispatchBody::None,
                PreparedBody::Bytes { bytes, .. } => DispatchBody::Bytes(bytes),
                PreparedBody::Multipart(factory) => DispatchBody::Multipart(factory),
                PreparedBody::Stream { make, total_bytes } => DispatchBody::Stream {
                    make,
                    total_bytes,
                    force_size: effective.force_stream_size.unwrap_or(false),
                    hooks: hooks.clone(),
                    ctx: Arc::clone(ctx),
                },
            };

            hooks
                .dispatch(|h| Box::pin(h.on_request_ready(ctx)))
                .await?;
            signal.check()?;

            // 12. Middleware chain: per-request → base → plugins in
            //     registration order → terminal fetch.
            let mut chain: Vec<Arc<dyn FetchMiddleware>> = Vec::new();
            if let Some(m) = &request_options.middleware {
                chain.push(Arc::clone(m));
            }
            if let Some(m) = &base.middleware {
                chain.push(Arc::clone(m));
            }
            chain.extend(runtime.middlewares.iter().cloned());

            let request = FetchRequest {
                method: method.to_owned(),
                url: resolved.full_url.clone(),
                headers: header_map,
                body: dispatch_body,
            };

            let reqwest_terminal = ReqwestFetch {
                client: self.http.clone(),
                signal: signal.clone(),
            };
            let terminal: &dyn Fetch = match &effective.fetch {
                Some(custom) => custom.as_ref(),
                None => &reqwest_terminal,
            };

            let raw = tokio::select! {
                _ = signal.aborted() => Err(signal.abort_error()),
                result = execute_chain(&chain, terminal, request) => result,
            }?;
            signal.check()?;

            // 13. Drain the body, fanning chunks to
            //     on_response_stream.
            buffer_response(raw, hooks, ctx, signal).await
        }
        .await;

        // 14. Settle the dedupe entry after parsing so deferred
        //     waiters observe the final response; removal happens when
        //     the guard drops.
        match dispatched {
            Ok(response) => {
                let outcome = self
                    .process_response(response.clone(), &plan, hooks, ctx, signal)
                    .await;
                match &outcome {
                    Ok(_) => guard.settle(Ok(&response)),
                    Err(error) => guard.settle(Err(error)),
                }
                outcome
            }
            Err(error) => {
                guard.settle(Err(&error));
                Err(error)
            }
        }
    }

    /// Shared tail for dispatched and deferred responses: classify
    /// non-2xx, parse, validate, success hooks.
    async fn process_response(
        &self,
        response: BufferedResponse,
        plan: &ResponsePlan<'_>,
        hooks: &HookRegistry,
        ctx: &Arc<CallContext>,
        signal: &AbortSignal,
    ) -> CallResult<(Value, BufferedResponse)> {
        signal.check()?;

        if !response.is_success() {
            let mut error_data = parse_error_data(&response, plan);
            if !plan.result_mode.bypasses_parsing() {
                if let Some(validator) = plan.route.and_then(|r| r.error_data.as_ref()) {
                    error_data = Some(
                        apply_validator(
                            validator,
                            &error_data.take().unwrap_or(Value::Null),
                            IssueCause::ErrorData,
                            Some(&response),
                        )
                        .await?,
                    );
                }
            }
            return Err(http_error(
                response,
                error_data,
                plan.default_http_error_message,
            ));
        }

        let mut data = if plan.result_mode.bypasses_parsing() {
            Value::Null
        } else {
            parse_body(&response, plan.response_type, plan.parser)?
        };

        if !plan.result_mode.bypasses_parsing() {
            if let Some(validator) = plan.route.and_then(|r| r.data.as_ref()) {
                let out =
                    apply_validator(validator, &data, IssueCause::Data, Some(&response)).await?;
                if !plan.disable_output_application {
                    data = out;
                }
            }
        }
        signal.check()?;

        hooks
            .dispatch(|h| Box::pin(h.on_response(ctx, &response, Some(&data))))
            .await?;
        hooks
            .dispatch(|h| Box::pin(h.on_success(ctx, &response, &data)))
            .await?;

        Ok((data, response))
    }
}

impl Default for CallClient {
    fn default() -> Self {
        Self::new()
    }
}

fn make_context(
    init_url: &str,
    full_url: &str,
    method: &str,
    attempt: u32,
    effective: &CallOptions,
) -> CallContext {
    CallContext {
        request_id: uuid::Uuid::new_v4().to_string(),
        init_url: init_url.to_owned(),
        full_url: full_url.to_owned(),
        method: method.to_owned(),
        attempt,
        request: Mutex::new(RequestParts {
            headers: effective.request.headers.clone(),
            body: effective.request.body.clone(),
        }),
        meta: Mutex::new(effective.meta.clone().unwrap_or(Value::Null)),
    }
}

/// The error-hook fan-out of the catch path. A hook's own failure
/// replaces the active error and short-circuits the remaining hooks;
/// it is classified once, never looped.
async fn run_error_hooks(
    hooks: &HookRegistry,
    ctx: &CallContext,
    error: CallError,
) -> CallError {
    let specific = match &error {
        CallError::Validation(detail) => {
            hooks
                .dispatch(|h| Box::pin(h.on_validation_error(ctx, detail)))
                .await
        }
        CallError::Http { response, .. } => {
            let result = hooks
                .dispatch(|h| Box::pin(h.on_response_error(ctx, response, &error)))
                .await;
            match result {
                // HTTP errors also fire on_response, with no data.
                Ok(()) => {
                    hooks
                        .dispatch(|h| Box::pin(h.on_response(ctx, response, None)))
                        .await
                }
                err => err,
            }
        }
        _ => {
            hooks
                .dispatch(|h| Box::pin(h.on_request_error(ctx, &error)))
                .await
        }
    };
    if let Err(superseding) = specific {
        return superseding;
    }
    if let Err(superseding) = hooks.dispatch(|h| Box::pin(h.on_error(ctx, &error))).await {
        return superseding;
    }
    error
}

fn shape_error<T>(
    error: CallError,
    result_mode: ResultMode,
    throw_on_error: &ThrowOnError,
) -> CallResult<CallOutcome<T>> {
    match throw_on_error.decide(&error) {
        Ok(true) => return Err(error),
        Ok(false) => {}
        // The predicate's own failure supersedes.
        Err(superseding) => return Err(superseding),
    }
    if result_mode.throws() {
        return Err(error);
    }
    let response = if result_mode.drops_response() {
        None
    } else {
        error.response().cloned()
    };
    Ok(CallOutcome::failure(ShapedError::from_error(error), response))
}

fn build_header_map(headers: &HashMap<String, String>) -> CallResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CallError::config(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| CallError::config(format!("invalid header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Content-Type / Accept inference back into the live header map, so
/// hooks and the fingerprint observe them.
fn apply_inferred_headers(ctx: &CallContext, prepared: &PreparedBody) {
    if let PreparedBody::Bytes {
        content_type,
        accept_json,
        ..
    } = prepared
    {
        let mut parts = ctx.request.lock().expect("request parts poisoned");
        if let Some(content_type) = content_type {
            let has = parts
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("content-type"));
            if !has {
                parts
                    .headers
                    .insert("Content-Type".into(), (*content_type).to_owned());
            }
        }
        if *accept_json {
            let has = parts.headers.keys().any(|k| k.eq_ignore_ascii_case("accept"));
            if !has {
                parts
                    .headers
                    .insert("Accept".into(), "application/json".to_owned());
            }
        }
    }
}

/// Same inference applied to the final `HeaderMap`, for bodies added
/// or replaced after the live-map pass.
fn default_body_headers(map: &mut HeaderMap, prepared: &PreparedBody) {
    if let PreparedBody::Bytes {
        content_type,
        accept_json,
        ..
    } = prepared
    {
        if let Some(content_type) = content_type {
            if !map.contains_key(CONTENT_TYPE) {
                map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        if *accept_json && !map.contains_key(ACCEPT) {
            map.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
    }
    // Multipart owns its boundary-based Content-Type.
    if matches!(prepared, PreparedBody::Multipart(_)) {
        map.remove(CONTENT_TYPE);
    }
}

fn params_as_value(effective: &CallOptions) -> Value {
    match &effective.params {
        Some(crate::url::Params::Named(map)) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        Some(crate::url::Params::Positional(list)) => Value::Array(list.clone()),
        None => Value::Null,
    }
}

fn query_as_value(effective: &CallOptions) -> Value {
    match &effective.query {
        Some(query) => Value::Object(
            query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        None => Value::Null,
    }
}

fn headers_as_value(ctx: &CallContext) -> Value {
    let parts = ctx.request.lock().expect("request parts poisoned");
    Value::Object(
        parts
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Best-effort decode of a non-2xx body: the configured parser and
/// response type first, raw text as fallback, `None` when empty.
fn parse_error_data(response: &BufferedResponse, plan: &ResponsePlan<'_>) -> Option<Value> {
    if response.body().is_empty() {
        return None;
    }
    match parse_body(response, plan.response_type, plan.parser) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(response.text())),
    }
}

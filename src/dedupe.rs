//! In-flight request deduplication.
//!
//! Two registries exist: a process-wide map shared by every client in
//! the process (required for cross-client cancellation; initialized once
//! at first use and never cleared implicitly) and a per-client map.
//! `DedupeScope` selects between them.
//!
//! An entry lives from registration until the owning attempt finishes
//! parsing; removal happens unconditionally when the guard drops.
//! Strategies:
//! - `Cancel` aborts the prior in-flight controller with a stable
//!   message and takes over the key;
//! - `Defer` subscribes to the prior entry's settlement and never
//!   dispatches;
//! - `None` bypasses the registry entirely.

use crate::error::CallError;
use crate::response::BufferedResponse;
use crate::signal::{AbortController, AbortReason};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// How concurrent identical requests are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupeStrategy {
    /// Abort the prior in-flight request and take over (the default).
    #[default]
    Cancel,
    /// Share the prior request's response instead of dispatching.
    Defer,
    /// Every call dispatches; the registry is never touched.
    None,
}

/// Which registry the dedupe key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupeScope {
    /// Shared across all clients in the process.
    Global,
    /// Private to one client (the default).
    #[default]
    Local,
}

/// The settlement every `Defer` waiter subscribes to.
pub(crate) type SharedSettlement =
    Shared<BoxFuture<'static, Result<BufferedResponse, CallError>>>;

pub(crate) struct DedupeEntry {
    id: u64,
    controller: AbortController,
    settlement: SharedSettlement,
}

pub(crate) type Registry = Arc<Mutex<HashMap<String, DedupeEntry>>>;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

pub(crate) fn global_registry() -> Registry {
    Arc::clone(&GLOBAL_REGISTRY)
}

pub(crate) fn new_local_registry() -> Registry {
    Registry::default()
}

/// The deterministic text a `Cancel` takeover aborts the prior request
/// with.
pub fn abort_error_message(key: &str) -> String {
    format!("Request aborted by a duplicate request with dedupe key '{key}'")
}

fn next_entry_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// What the orchestrator does with this attempt.
pub(crate) enum DedupeDecision {
    /// Dispatch, and settle the guard when parsing completes.
    Proceed(DedupeGuard),
    /// Await the prior request's settlement; do not dispatch.
    Defer(SharedSettlement),
}

/// Owns one registry entry. Settle it exactly once; dropping it removes
/// the entry (and fails any waiters that never got a settlement).
pub(crate) struct DedupeGuard {
    slot: Option<(String, u64, Registry)>,
    sender: Option<oneshot::Sender<Result<BufferedResponse, CallError>>>,
}

impl DedupeGuard {
    fn inert() -> Self {
        Self {
            slot: None,
            sender: None,
        }
    }

    /// Publish the attempt's outcome to any deferred waiters.
    pub(crate) fn settle(&mut self, result: Result<&BufferedResponse, &CallError>) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(match result {
                Ok(response) => Ok(response.clone()),
                Err(error) => Err(error.clone()),
            });
        }
    }
}

impl Drop for DedupeGuard {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(CallError::other(
                "Error",
                "Deduplicated request settled without a response",
            )));
        }
        if let Some((key, id, registry)) = self.slot.take() {
            let mut map = registry.lock().expect("dedupe registry poisoned");
            // Only remove our own entry; a Cancel takeover may have
            // replaced it already.
            if map.get(&key).is_some_and(|entry| entry.id == id) {
                map.remove(&key);
            }
        }
    }
}

/// Register this attempt under `key`, applying the strategy against any
/// in-flight entry.
pub(crate) fn register(
    registry: &Registry,
    key: Option<&str>,
    strategy: DedupeStrategy,
    controller: &AbortController,
) -> DedupeDecision {
    let Some(key) = key else {
        return DedupeDecision::Proceed(DedupeGuard::inert());
    };
    if strategy == DedupeStrategy::None {
        return DedupeDecision::Proceed(DedupeGuard::inert());
    }

    let mut map = registry.lock().expect("dedupe registry poisoned");

    if let Some(existing) = map.get(key) {
        match strategy {
            DedupeStrategy::Cancel => {
                tracing::debug!(
                    target: "callwire::dedupe",
                    key,
                    "cancelling in-flight request for duplicate"
                );
                existing
                    .controller
                    .abort(AbortReason::dedupe(abort_error_message(key)));
            }
            DedupeStrategy::Defer => {
                tracing::debug!(
                    target: "callwire::dedupe",
                    key,
                    "deferring to in-flight request"
                );
                return DedupeDecision::Defer(existing.settlement.clone());
            }
            DedupeStrategy::None => unreachable!("handled above"),
        }
    }

    let (sender, receiver) = oneshot::channel();
    let settlement: SharedSettlement = async move {
        receiver.await.unwrap_or_else(|_| {
            Err(CallError::other(
                "Error",
                "Deduplicated request settled without a response",
            ))
        })
    }
    .boxed()
    .shared();

    let id = next_entry_id();
    map.insert(
        key.to_owned(),
        DedupeEntry {
            id,
            controller: controller.clone(),
            settlement,
        },
    );

    DedupeDecision::Proceed(DedupeGuard {
        slot: Some((key.to_owned(), id, Arc::clone(registry))),
        sender: Some(sender),
    })
}

fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonicalize(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// The order-independent request fingerprint: a hash over URL, method,
/// serialized body and the resolved headers, with object keys sorted at
/// every depth.
pub fn fingerprint(
    full_url: &str,
    method: &str,
    body: &Value,
    headers: &[(String, String)],
) -> String {
    let mut sorted_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    sorted_headers.sort();

    let mut canonical = String::new();
    canonicalize(
        &serde_json::json!({
            "url": full_url,
            "method": method.to_ascii_uppercase(),
            "body": body,
            "headers": sorted_headers,
        }),
        &mut canonical,
    );

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("dd-{:016x}-{}", hasher.finish(), canonical.len())
}

//! Plugin runtime.
//!
//! A plugin bundles an id, optional async `setup`, lifecycle hooks,
//! one fetch middleware, lowest-priority config defaults and a
//! lowest-priority schema. At call time the runtime composes the final
//! plugin list (the per-request `plugins` option may be a list or a
//! function of the base list), rejects duplicate ids, runs every
//! `setup` in order (each may shallowly override the init URL, the
//! request slice or the extra options before the next setup), and
//! collects hooks and middlewares in registration order.

use crate::config::{CallOptions, RequestOptions};
use crate::error::{CallError, CallResult};
use crate::hooks::CallHooks;
use crate::middleware::FetchMiddleware;
use crate::schema::SchemaConfig;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// What `setup` may override, shallowly, before the next plugin runs.
#[derive(Default)]
pub struct PluginSetup {
    pub init_url: Option<String>,
    /// Replaces the request slice.
    pub request: Option<RequestOptions>,
    /// Fields set here replace the corresponding extra options.
    pub options: Option<CallOptions>,
}

/// Read-only view handed to `setup`.
pub struct PluginSetupContext<'a> {
    pub init_url: &'a str,
    pub options: &'a CallOptions,
}

/// The plugin contract.
#[async_trait]
pub trait CallPlugin: Send + Sync {
    /// Unique per client; duplicates are rejected at init.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> Option<&str> {
        None
    }

    /// Runs once per call, in registration order, before URL
    /// resolution.
    async fn setup(&self, _ctx: &PluginSetupContext<'_>) -> CallResult<PluginSetup> {
        Ok(PluginSetup::default())
    }

    fn hooks(&self) -> Option<Arc<dyn CallHooks>> {
        None
    }

    fn middleware(&self) -> Option<Arc<dyn FetchMiddleware>> {
        None
    }

    /// Lowest-priority config layer.
    fn defaults(&self) -> Option<CallOptions> {
        None
    }

    /// Lowest-priority schema layer.
    fn schema(&self) -> Option<SchemaConfig> {
        None
    }
}

/// The per-request `plugins` option: a replacement list, or a function
/// receiving the base list and returning the final one.
#[derive(Clone)]
pub enum PluginsOption {
    List(Vec<Arc<dyn CallPlugin>>),
    Fn(Arc<dyn Fn(&[Arc<dyn CallPlugin>]) -> Vec<Arc<dyn CallPlugin>> + Send + Sync>),
}

impl std::fmt::Debug for PluginsOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List(list) => write!(f, "PluginsOption::List({} plugins)", list.len()),
            Self::Fn(_) => f.write_str("PluginsOption::Fn(..)"),
        }
    }
}

/// Resolve the final plugin list from the base list and the per-request
/// override.
pub(crate) fn resolve_plugins(
    base: &[Arc<dyn CallPlugin>],
    request: Option<&PluginsOption>,
) -> Vec<Arc<dyn CallPlugin>> {
    match request {
        None => base.to_vec(),
        Some(PluginsOption::List(list)) => list.clone(),
        Some(PluginsOption::Fn(f)) => f(base),
    }
}

/// Everything the orchestrator needs from the plugin layer.
pub(crate) struct PluginRuntime {
    /// Hooks in registration order.
    pub hooks: Vec<Arc<dyn CallHooks>>,
    /// Middlewares in registration order.
    pub middlewares: Vec<Arc<dyn FetchMiddleware>>,
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("hooks", &self.hooks.len())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Run the plugin init sequence: duplicate-id check, `setup` chain,
/// then defaults and schema merging into `options`.
///
/// Returns the runtime plus the possibly-overridden init URL.
pub(crate) async fn initialize(
    plugins: Vec<Arc<dyn CallPlugin>>,
    mut init_url: String,
    options: &mut CallOptions,
) -> CallResult<(PluginRuntime, String)> {
    let mut seen = HashSet::new();
    for plugin in &plugins {
        if !seen.insert(plugin.id().to_owned()) {
            return Err(CallError::config(format!(
                "duplicate plugin id '{}'",
                plugin.id()
            )));
        }
    }

    for plugin in &plugins {
        let patch = {
            let ctx = PluginSetupContext {
                init_url: &init_url,
                options,
            };
            plugin.setup(&ctx).await?
        };
        if let Some(url) = patch.init_url {
            init_url = url;
        }
        if let Some(request) = patch.request {
            options.request = request;
        }
        if let Some(extra) = patch.options {
            options.overlay_some(extra);
        }
        tracing::trace!(
            target: "callwire::plugin",
            plugin = plugin.id(),
            "setup complete"
        );
    }

    for plugin in &plugins {
        if let Some(defaults) = plugin.defaults() {
            options.fill_from(&defaults);
        }
        if let Some(schema) = plugin.schema() {
            options.schema = Some(match options.schema.take() {
                Some(own) => own.merged_under(&schema),
                None => schema,
            });
        }
    }

    let hooks = plugins.iter().filter_map(|p| p.hooks()).collect();
    let middlewares = plugins.iter().filter_map(|p| p.middleware()).collect();

    Ok((PluginRuntime { hooks, middlewares }, init_url))
}

//! callwire
//!
//! A typed HTTP request-pipeline engine on top of `reqwest`: config
//! merging, plugins, schema validation, in-flight dedupe, middleware
//! composition, lifecycle hooks, retry and result shaping.
//!
//! ```rust,no_run
//! use callwire::prelude::*;
//! use serde_json::Value;
//!
//! # async fn example() -> Result<(), callwire::CallError> {
//! let client = CallClient::builder()
//!     .base_url("https://api.example.com")
//!     .build();
//!
//! let outcome = client
//!     .call::<Value>("@get/users/:id", CallOptions::new().with_params(Params::named([("id", 7)])))
//!     .await?;
//!
//! if let Some(user) = outcome.data {
//!     println!("{user}");
//! }
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub mod auth;
pub mod body;
pub mod client;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod hooks;
pub mod middleware;
pub mod plugin;
pub mod response;
pub mod result;
pub mod retry;
pub mod schema;
pub mod signal;
pub mod stream;
pub mod url;

pub use client::{BaseConfigFn, CallClient, ClientBuilder};
pub use config::{CallOptions, RequestOptions, SkipAutoMerge};
pub use error::{CallError, CallResult, ShapedError};
pub use result::{CallOutcome, ResultMode};

/// The commonly needed surface in one import.
pub mod prelude {
    pub use crate::auth::Auth;
    pub use crate::body::RequestBody;
    pub use crate::client::{CallClient, ClientBuilder};
    pub use crate::config::{CallOptions, SkipAutoMerge};
    pub use crate::dedupe::{DedupeScope, DedupeStrategy};
    pub use crate::error::{CallError, CallResult, ShapedError};
    pub use crate::hooks::{CallHooks, HookMode, LoggingHooks};
    pub use crate::middleware::{Fetch, FetchMiddleware, FetchRequest, Next};
    pub use crate::plugin::{CallPlugin, PluginSetup, PluginsOption};
    pub use crate::response::{BufferedResponse, RawResponse, ResponseType};
    pub use crate::result::{CallOutcome, ResultMode, ThrowOnError};
    pub use crate::retry::{RetryPolicy, RetryStrategy};
    pub use crate::schema::{RouteSchema, SchemaConfig, SchemaValidator, StandardSchema};
    pub use crate::signal::{AbortController, AbortReason, AbortSignal};
    pub use crate::url::{Params, Query};
}

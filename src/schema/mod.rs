//! Schema validation.
//!
//! Validators apply to the outgoing request (`body`, `headers`,
//! `params`, `query`, `method`) before dispatch and to the decoded
//! payloads (`data`, `error_data`) after dispatch. A validator is
//! either a [`StandardSchema`] vendor object or an arbitrary fallible
//! function; both may transform the value they accept.
//!
//! Failures raise `CallError::Validation` with issues formatted as
//! `"<message> → at <dot.path>"`, one line per issue, tagged with the
//! originating [`IssueCause`] and, post-dispatch, the response.

mod routes;

pub use routes::{RouteKey, resolve_route};

use crate::error::{
    CallError, CallResult, IssueCause, PathSegment, ValidationDetail, ValidationIssue,
};
use crate::response::BufferedResponse;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a standard-schema validation.
pub enum Validated {
    /// Accepted; carries the (possibly transformed) value.
    Value(Value),
    /// Rejected with a list of findings.
    Issues(Vec<ValidationIssue>),
}

/// The vendor validation contract: one `validate` entry point that
/// either accepts (returning the output value) or reports issues.
#[async_trait]
pub trait StandardSchema: Send + Sync {
    async fn validate(&self, value: &Value) -> Validated;
}

/// A validator attached to one slot of a route schema.
#[derive(Clone)]
pub enum SchemaValidator {
    Standard(Arc<dyn StandardSchema>),
    /// Arbitrary function: returns the transformed value or fails.
    Func(Arc<dyn Fn(&Value) -> CallResult<Value> + Send + Sync>),
}

impl SchemaValidator {
    pub fn standard(schema: impl StandardSchema + 'static) -> Self {
        Self::Standard(Arc::new(schema))
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Value) -> CallResult<Value> + Send + Sync + 'static,
    {
        Self::Func(Arc::new(f))
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard(_) => f.write_str("SchemaValidator::Standard(..)"),
            Self::Func(_) => f.write_str("SchemaValidator::Func(..)"),
        }
    }
}

/// Validators for one route.
#[derive(Debug, Clone, Default)]
pub struct RouteSchema {
    pub data: Option<SchemaValidator>,
    pub error_data: Option<SchemaValidator>,
    pub body: Option<SchemaValidator>,
    pub headers: Option<SchemaValidator>,
    pub query: Option<SchemaValidator>,
    pub params: Option<SchemaValidator>,
    pub method: Option<SchemaValidator>,
}

impl RouteSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, v: SchemaValidator) -> Self {
        self.data = Some(v);
        self
    }

    pub fn with_error_data(mut self, v: SchemaValidator) -> Self {
        self.error_data = Some(v);
        self
    }

    pub fn with_body(mut self, v: SchemaValidator) -> Self {
        self.body = Some(v);
        self
    }

    pub fn with_headers(mut self, v: SchemaValidator) -> Self {
        self.headers = Some(v);
        self
    }

    pub fn with_query(mut self, v: SchemaValidator) -> Self {
        self.query = Some(v);
        self
    }

    pub fn with_params(mut self, v: SchemaValidator) -> Self {
        self.params = Some(v);
        self
    }

    pub fn with_method(mut self, v: SchemaValidator) -> Self {
        self.method = Some(v);
        self
    }
}

/// Route-keyed schema map plus its matching configuration.
#[derive(Debug, Clone, Default)]
pub struct SchemaConfig {
    pub routes: HashMap<String, RouteSchema>,
    /// Stripped from the normalized URL before key matching.
    pub prefix: Option<String>,
    /// Aligned against absolute init URLs before key matching.
    pub base_url: Option<String>,
    /// Reject requests whose route matches no key, not even `@default`.
    pub strict: bool,
    /// Run validators for their rejections only; discard transformed
    /// output for request slots.
    pub disable_runtime_transform: bool,
    /// Same, for the response `data` slot.
    pub disable_output_application: bool,
}

impl SchemaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, key: impl Into<String>, schema: RouteSchema) -> Self {
        self.routes.insert(key.into(), schema);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn disable_runtime_transform(mut self, disable: bool) -> Self {
        self.disable_runtime_transform = disable;
        self
    }

    pub fn disable_output_application(mut self, disable: bool) -> Self {
        self.disable_output_application = disable;
        self
    }

    /// Overlay `self` on top of lower-priority `base` routes (plugin
    /// schemas merge below the client's own).
    pub(crate) fn merged_under(mut self, base: &SchemaConfig) -> Self {
        for (key, schema) in &base.routes {
            self.routes
                .entry(key.clone())
                .or_insert_with(|| schema.clone());
        }
        self
    }
}

/// Run one validator against one value.
///
/// Returns the transformed value on acceptance. On rejection the issues
/// are wrapped into `CallError::Validation` tagged with `cause`;
/// post-dispatch causes attach the response as well.
pub(crate) async fn apply_validator(
    validator: &SchemaValidator,
    value: &Value,
    cause: IssueCause,
    response: Option<&BufferedResponse>,
) -> CallResult<Value> {
    let outcome = match validator {
        SchemaValidator::Standard(schema) => schema.validate(value).await,
        SchemaValidator::Func(f) => match f(value) {
            Ok(out) => Validated::Value(out),
            Err(CallError::Validation(detail)) => Validated::Issues(detail.issues),
            Err(other) => Validated::Issues(vec![ValidationIssue::new(other.to_string())]),
        },
    };
    match outcome {
        Validated::Value(out) => Ok(out),
        Validated::Issues(issues) => {
            let mut detail = ValidationDetail::new(issues, cause);
            if let Some(response) = response {
                detail = detail.with_response(response.clone());
            }
            Err(CallError::Validation(detail))
        }
    }
}

/// A standard-schema validator that requires an object to carry the
/// given keys with non-null values. Handy for tests and simple guards.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl StandardSchema for RequiredFields {
    async fn validate(&self, value: &Value) -> Validated {
        let issues: Vec<ValidationIssue> = self
            .fields
            .iter()
            .filter(|field| {
                value
                    .get(field.as_str())
                    .map(Value::is_null)
                    .unwrap_or(true)
            })
            .map(|field| {
                ValidationIssue::new("required field missing")
                    .at(vec![PathSegment::Key(field.clone())])
            })
            .collect();
        if issues.is_empty() {
            Validated::Value(value.clone())
        } else {
            Validated::Issues(issues)
        }
    }
}

#[cfg(feature = "json-schema")]
mod json_schema {
    //! Adapter exposing a compiled `jsonschema` document through the
    //! standard validator contract.

    use super::*;

    pub struct JsonSchema {
        compiled: jsonschema::Validator,
    }

    impl JsonSchema {
        pub fn compile(document: &Value) -> CallResult<Self> {
            let compiled = jsonschema::validator_for(document)
                .map_err(|e| CallError::config(format!("invalid json schema: {e}")))?;
            Ok(Self { compiled })
        }
    }

    fn pointer_segments(pointer: &str) -> Vec<PathSegment> {
        pointer
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(s.replace("~1", "/").replace("~0", "~")),
            })
            .collect()
    }

    #[async_trait]
    impl StandardSchema for JsonSchema {
        async fn validate(&self, value: &Value) -> Validated {
            let issues: Vec<ValidationIssue> = self
                .compiled
                .iter_errors(value)
                .map(|error| {
                    let path = pointer_segments(&error.instance_path.to_string());
                    ValidationIssue::new(error.to_string()).at(path)
                })
                .collect();
            if issues.is_empty() {
                Validated::Value(value.clone())
            } else {
                Validated::Issues(issues)
            }
        }
    }
}

#[cfg(feature = "json-schema")]
pub use json_schema::JsonSchema;

//! Route-key grammar and resolution.
//!
//! `<route-key> ::= ["@" <method>] <path>`: an optional lowercase verb
//! tag followed by a concrete path. The pseudo-key `@default` applies to
//! any route without an exact match. Matching is exact after stripping
//! the schema's configured `prefix` (or aligning an absolute URL against
//! its `base_url`).

use super::{RouteSchema, SchemaConfig};
use crate::error::{CallError, CallResult, IssueCause, ValidationDetail, ValidationIssue};

/// The catch-all key.
pub const DEFAULT_ROUTE: &str = "@default";

/// A parsed route key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    /// Lowercase verb, when the key is method-tagged.
    pub method: Option<String>,
    pub path: String,
}

impl RouteKey {
    pub fn parse(key: &str) -> Self {
        if let Some(rest) = key.strip_prefix('@') {
            if let Some(slash) = rest.find('/') {
                return Self {
                    method: Some(rest[..slash].to_ascii_lowercase()),
                    path: rest[slash..].to_owned(),
                };
            }
        }
        Self {
            method: None,
            path: key.to_owned(),
        }
    }
}

/// Normalize the request path against the schema config: strip the
/// configured `prefix`, or the `base_url` when the init URL was
/// absolute.
fn normalize_path(config: &SchemaConfig, normalized_init_url: &str) -> String {
    if let Some(prefix) = &config.prefix {
        if let Some(rest) = normalized_init_url.strip_prefix(prefix.as_str()) {
            return ensure_leading_slash(rest);
        }
    }
    if let Some(base) = &config.base_url {
        if let Some(rest) = normalized_init_url.strip_prefix(base.as_str()) {
            return ensure_leading_slash(rest);
        }
    }
    normalized_init_url.to_owned()
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Find the route schema for `(method, normalized_init_url)`.
///
/// Exact match wins (a method-tagged key must also match the verb);
/// otherwise `@default` applies. With `strict` and no match at all this
/// is a validation error with `issue_cause = unknown`.
pub fn resolve_route<'a>(
    config: &'a SchemaConfig,
    method: &str,
    normalized_init_url: &str,
) -> CallResult<Option<&'a RouteSchema>> {
    let path = normalize_path(config, normalized_init_url);
    let method = method.to_ascii_lowercase();

    for (key, schema) in &config.routes {
        if key == DEFAULT_ROUTE {
            continue;
        }
        let parsed = RouteKey::parse(key);
        let method_matches = parsed.method.as_deref().is_none_or(|m| m == method);
        if method_matches && parsed.path == path {
            return Ok(Some(schema));
        }
    }

    if let Some(schema) = config.routes.get(DEFAULT_ROUTE) {
        return Ok(Some(schema));
    }

    if config.strict {
        return Err(CallError::Validation(ValidationDetail::new(
            vec![ValidationIssue::new(format!(
                "no schema route matches {method} {path}"
            ))],
            IssueCause::Unknown,
        )));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaValidator;

    fn marker() -> RouteSchema {
        RouteSchema::new().with_data(SchemaValidator::func(|v| Ok(v.clone())))
    }

    #[test]
    fn parses_method_tagged_keys() {
        let key = RouteKey::parse("@post/users");
        assert_eq!(key.method.as_deref(), Some("post"));
        assert_eq!(key.path, "/users");

        let bare = RouteKey::parse("/users");
        assert!(bare.method.is_none());
        assert_eq!(bare.path, "/users");
    }

    #[test]
    fn exact_match_wins_over_default() {
        let config = SchemaConfig::new()
            .route("@post/users", marker())
            .route(DEFAULT_ROUTE, RouteSchema::new());
        let schema = resolve_route(&config, "POST", "/users").unwrap().unwrap();
        assert!(schema.data.is_some());
    }

    #[test]
    fn method_tag_must_match_the_verb() {
        let config = SchemaConfig::new().route("@post/users", marker());
        assert!(resolve_route(&config, "GET", "/users").unwrap().is_none());
    }

    #[test]
    fn default_key_catches_unmatched_routes() {
        let config = SchemaConfig::new().route(DEFAULT_ROUTE, marker());
        let schema = resolve_route(&config, "GET", "/anything").unwrap().unwrap();
        assert!(schema.data.is_some());
    }

    #[test]
    fn prefix_is_stripped_before_matching() {
        let config = SchemaConfig::new()
            .with_prefix("/api/v2")
            .route("/users", marker());
        assert!(resolve_route(&config, "GET", "/api/v2/users")
            .unwrap()
            .is_some());
    }

    #[test]
    fn base_url_aligns_absolute_init_urls() {
        let config = SchemaConfig::new()
            .with_base_url("https://api.test")
            .route("/users", marker());
        assert!(resolve_route(&config, "GET", "https://api.test/users")
            .unwrap()
            .is_some());
    }

    #[test]
    fn strict_mode_rejects_unmatched_routes() {
        let config = SchemaConfig::new().strict(true).route("/known", marker());
        let err = resolve_route(&config, "GET", "/unknown").unwrap_err();
        match err {
            CallError::Validation(detail) => assert_eq!(detail.cause, IssueCause::Unknown),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_strict_unmatched_route_is_simply_unvalidated() {
        let config = SchemaConfig::new().route("/known", marker());
        assert!(resolve_route(&config, "GET", "/unknown").unwrap().is_none());
    }
}

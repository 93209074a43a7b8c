//! URL resolution.
//!
//! Turns the user's `init_url` plus `base_url`, `params` and `query`
//! into the final dispatch URL:
//! - a leading `@<method>/` prefix captures the verb (an explicit
//!   per-request method wins) and is stripped before resolution;
//! - relative URLs concatenate with `base_url`, normalizing exactly one
//!   `/` at the join;
//! - `:name` and `{name}` placeholders substitute from named or
//!   positional params; substituted values are intentionally NOT
//!   percent-encoded (callers pass pre-encoded values), and unresolved
//!   placeholders stay literal;
//! - query values are form-urlencoded, arrays comma-joined, absent
//!   values skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static COLON_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid pattern"));
static BRACE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid pattern"));

/// Path parameters: named (map lookup) or positional (consumed in
/// placeholder order).
#[derive(Debug, Clone)]
pub enum Params {
    Named(HashMap<String, Value>),
    Positional(Vec<Value>),
}

impl Params {
    pub fn named<K: Into<String>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn positional<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }
}

/// Query parameters, order-preserving.
pub type Query = Vec<(String, Value)>;

/// Output of [`resolve_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    /// The final dispatch URL.
    pub full_url: String,
    /// The pre-`base_url` path (prefix stripped, params substituted,
    /// no query) used for schema route matching.
    pub normalized_init_url: String,
    /// Method captured from a `@<method>/` prefix, uppercased.
    pub method_from_url: Option<String>,
}

const URL_METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "head", "options"];

/// Split a leading `@<method>/` prefix off the init URL.
pub(crate) fn extract_method_prefix(init_url: &str) -> (Option<String>, &str) {
    let Some(rest) = init_url.strip_prefix('@') else {
        return (None, init_url);
    };
    let Some(slash) = rest.find('/') else {
        return (None, init_url);
    };
    let method = &rest[..slash];
    if URL_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
        (Some(method.to_ascii_uppercase()), &rest[slash..])
    } else {
        (None, init_url)
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `:name` and `{name}` placeholders. Values are inserted
/// verbatim; unresolved placeholders remain literal.
pub(crate) fn substitute_params(path: &str, params: &Params) -> String {
    match params {
        Params::Named(map) => {
            let pass1 = COLON_PARAM.replace_all(path, |caps: &regex::Captures<'_>| {
                match map.get(&caps[1]) {
                    Some(v) => scalar_to_string(v),
                    None => caps[0].to_string(),
                }
            });
            BRACE_PARAM
                .replace_all(&pass1, |caps: &regex::Captures<'_>| {
                    match map.get(caps[1].trim()) {
                        Some(v) => scalar_to_string(v),
                        None => caps[0].to_string(),
                    }
                })
                .into_owned()
        }
        Params::Positional(values) => {
            let mut next = values.iter();
            let pass1 = COLON_PARAM.replace_all(path, |caps: &regex::Captures<'_>| {
                match next.next() {
                    Some(v) => scalar_to_string(v),
                    None => caps[0].to_string(),
                }
            });
            BRACE_PARAM
                .replace_all(&pass1, |caps: &regex::Captures<'_>| match next.next() {
                    Some(v) => scalar_to_string(v),
                    None => caps[0].to_string(),
                })
                .into_owned()
        }
    }
}

fn encode_query_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| urlencoding::encode(&scalar_to_string(v)).into_owned())
            .collect::<Vec<_>>()
            .join(","),
        other => urlencoding::encode(&scalar_to_string(other)).into_owned(),
    }
}

/// Serialize query pairs, skipping `null` values.
pub(crate) fn serialize_query(query: &Query) -> String {
    query
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k),
                encode_query_value(v)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn is_absolute(url: &str) -> bool {
    url.contains("://")
}

/// Concatenate base and path with exactly one `/` at the join.
fn join_base(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base.trim_end_matches('/'), path),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Resolve the dispatch URL. See the module docs for the exact rules.
pub fn resolve_url(
    init_url: &str,
    base_url: Option<&str>,
    params: Option<&Params>,
    query: Option<&Query>,
) -> ResolvedUrl {
    let (method_from_url, stripped) = extract_method_prefix(init_url);

    let substituted = match params {
        Some(params) => substitute_params(stripped, params),
        None => stripped.to_owned(),
    };

    let mut full_url = if is_absolute(&substituted) {
        substituted.clone()
    } else {
        match base_url {
            Some(base) if !base.is_empty() => join_base(base, &substituted),
            _ => substituted.clone(),
        }
    };

    if let Some(query) = query {
        let serialized = serialize_query(query);
        if !serialized.is_empty() {
            let sep = if full_url.contains('?') { '&' } else { '?' };
            full_url.push(sep);
            full_url.push_str(&serialized);
        }
    }

    ResolvedUrl {
        full_url,
        normalized_init_url: substituted,
        method_from_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_prefix_is_extracted_and_uppercased() {
        let resolved = resolve_url("@post/users", Some("https://api.test"), None, None);
        assert_eq!(resolved.method_from_url.as_deref(), Some("POST"));
        assert_eq!(resolved.full_url, "https://api.test/users");
        assert_eq!(resolved.normalized_init_url, "/users");
    }

    #[test]
    fn unknown_method_prefix_stays_literal() {
        let (method, rest) = extract_method_prefix("@magic/users");
        assert!(method.is_none());
        assert_eq!(rest, "@magic/users");
    }

    #[test]
    fn absolute_url_ignores_base() {
        let resolved = resolve_url("https://other.test/v1", Some("https://api.test"), None, None);
        assert_eq!(resolved.full_url, "https://other.test/v1");
    }

    #[test]
    fn join_normalizes_to_a_single_slash() {
        for (base, path) in [
            ("https://api.test", "users"),
            ("https://api.test/", "users"),
            ("https://api.test", "/users"),
            ("https://api.test/", "/users"),
        ] {
            let resolved = resolve_url(path, Some(base), None, None);
            assert_eq!(resolved.full_url, "https://api.test/users", "{base} + {path}");
        }
    }

    #[test]
    fn named_params_substitute_both_styles() {
        let params = Params::named([("id", json!(7)), ("tab", json!("posts"))]);
        let resolved = resolve_url("/users/:id/{tab}", Some("https://x"), Some(&params), None);
        assert_eq!(resolved.full_url, "https://x/users/7/posts");
    }

    #[test]
    fn positional_params_consume_in_order() {
        let params = Params::positional([json!("a"), json!("b")]);
        assert_eq!(substitute_params("/x/:one/{two}", &params), "/x/a/b");
    }

    #[test]
    fn unresolved_placeholders_remain_literal() {
        let params = Params::named([("id", json!(1))]);
        assert_eq!(
            substitute_params("/users/:id/:missing", &params),
            "/users/1/:missing"
        );
    }

    #[test]
    fn substituted_values_are_not_percent_encoded() {
        let params = Params::named([("path", json!("a/b c"))]);
        assert_eq!(substitute_params("/f/:path", &params), "/f/a/b c");
    }

    #[test]
    fn query_values_are_encoded_and_arrays_comma_joined() {
        let query: Query = vec![
            ("q".into(), json!("a b")),
            ("tags".into(), json!(["x", "y"])),
            ("skip".into(), Value::Null),
            ("n".into(), json!(3)),
        ];
        assert_eq!(serialize_query(&query), "q=a%20b&tags=x,y&n=3");
    }

    #[test]
    fn query_appends_with_correct_separator() {
        let query: Query = vec![("b".into(), json!("2"))];
        let resolved = resolve_url("/p?a=1", Some("https://x"), None, Some(&query));
        assert_eq!(resolved.full_url, "https://x/p?a=1&b=2");
    }
}

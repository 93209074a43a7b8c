//! Authorization header resolution.
//!
//! `Auth` is a tagged variant (`Bearer` / `Token` / `Basic` / `Custom`);
//! every field may be a static value, a nullary function, or an async
//! provider, resolved right before dispatch. A resolved `None` writes no
//! Authorization header at all.

use crate::error::CallResult;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;

/// An async source for a credential fragment.
#[async_trait]
pub trait AuthValueProvider: Send + Sync {
    async fn resolve(&self) -> CallResult<Option<String>>;
}

/// A credential fragment: static, lazily computed, or fetched async
/// (e.g. from a token refresher).
#[derive(Clone)]
pub enum AuthValue {
    Static(String),
    Fn(Arc<dyn Fn() -> Option<String> + Send + Sync>),
    Async(Arc<dyn AuthValueProvider>),
}

impl AuthValue {
    pub async fn resolve(&self) -> CallResult<Option<String>> {
        match self {
            Self::Static(value) => Ok(Some(value.clone())),
            Self::Fn(f) => Ok(f()),
            Self::Async(provider) => provider.resolve().await,
        }
    }
}

impl std::fmt::Debug for AuthValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(_) => f.write_str("AuthValue::Static(..)"),
            Self::Fn(_) => f.write_str("AuthValue::Fn(..)"),
            Self::Async(_) => f.write_str("AuthValue::Async(..)"),
        }
    }
}

impl From<&str> for AuthValue {
    fn from(value: &str) -> Self {
        Self::Static(value.to_owned())
    }
}

impl From<String> for AuthValue {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

/// The Authorization scheme. A bare string converts to `Bearer`.
#[derive(Debug, Clone)]
pub enum Auth {
    Bearer(AuthValue),
    Token(AuthValue),
    Basic {
        username: AuthValue,
        password: AuthValue,
    },
    Custom {
        prefix: String,
        value: AuthValue,
    },
}

impl Auth {
    pub fn bearer(value: impl Into<AuthValue>) -> Self {
        Self::Bearer(value.into())
    }

    pub fn token(value: impl Into<AuthValue>) -> Self {
        Self::Token(value.into())
    }

    pub fn basic(username: impl Into<AuthValue>, password: impl Into<AuthValue>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn custom(prefix: impl Into<String>, value: impl Into<AuthValue>) -> Self {
        Self::Custom {
            prefix: prefix.into(),
            value: value.into(),
        }
    }

    /// Resolve to the final `Authorization` header value, or `None`
    /// when the credential resolves to nothing.
    pub async fn header_value(&self) -> CallResult<Option<String>> {
        match self {
            Self::Bearer(value) => Ok(value.resolve().await?.map(|v| format!("Bearer {v}"))),
            Self::Token(value) => Ok(value.resolve().await?.map(|v| format!("Token {v}"))),
            Self::Basic { username, password } => {
                let (Some(user), Some(pass)) =
                    (username.resolve().await?, password.resolve().await?)
                else {
                    return Ok(None);
                };
                let encoded = BASE64.encode(format!("{user}:{pass}"));
                Ok(Some(format!("Basic {encoded}")))
            }
            Self::Custom { prefix, value } => {
                Ok(value.resolve().await?.map(|v| format!("{prefix} {v}")))
            }
        }
    }
}

impl From<&str> for Auth {
    fn from(value: &str) -> Self {
        Self::Bearer(value.into())
    }
}

impl From<String> for Auth {
    fn from(value: String) -> Self {
        Self::Bearer(value.into())
    }
}

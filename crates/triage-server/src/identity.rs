//! Handshake identity resolution.
//!
//! The server does not authenticate credentials itself; it asks an
//! [`IdentityResolver`] to map handshake context to a principal. The
//! bundled [`TokenIdentityResolver`] checks, first match wins:
//!
//! 1. a trusted header set by an upstream proxy (value is the principal)
//! 2. `Authorization: Bearer <token>`
//! 3. the `session` cookie
//! 4. the `token` query parameter
//!
//! Sources 2-4 carry a token that is looked up in the configured table.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName};
use axum_extra::extract::cookie::CookieJar;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use tracing::{debug, warn};
use triage_core::PrincipalId;
use triage_settings::AuthSettings;

/// Cookie carrying a session token.
pub const SESSION_COOKIE: &str = "session";
/// Query parameter carrying a token.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Request context available while the transport handshake is in progress.
#[derive(Clone, Debug, Default)]
pub struct HandshakeContext {
    /// Upgrade request headers.
    pub headers: HeaderMap,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
}

impl HandshakeContext {
    /// Build from request parts.
    pub fn new(headers: HeaderMap, query: HashMap<String, String>) -> Self {
        Self { headers, query }
    }

    /// Value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Token from `Authorization: Bearer`.
    pub fn bearer_token(&self) -> Option<String> {
        self.headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_owned())
    }

    /// Value of a request cookie.
    pub fn cookie(&self, name: &str) -> Option<String> {
        CookieJar::from_headers(&self.headers)
            .get(name)
            .map(|c| c.value().to_owned())
    }

    /// Value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Maps handshake context to a principal.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve the principal, or `None` when the handshake is anonymous.
    async fn resolve(&self, handshake: &HandshakeContext) -> Option<PrincipalId>;
}

/// Resolver backed by a static token table and an optional trusted header.
#[derive(Clone, Debug, Default)]
pub struct TokenIdentityResolver {
    tokens: HashMap<String, PrincipalId>,
    trusted_header: Option<HeaderName>,
}

impl TokenIdentityResolver {
    /// Create from a token -> principal table.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        let tokens = tokens
            .into_iter()
            .filter_map(|(token, principal)| {
                PrincipalId::parse(Some(&principal)).map(|p| (token, p))
            })
            .collect();
        Self {
            tokens,
            trusted_header: None,
        }
    }

    /// Also accept the principal verbatim from `header`.
    #[must_use]
    pub fn with_trusted_header(mut self, header: &str) -> Self {
        match HeaderName::try_from(header.to_ascii_lowercase()) {
            Ok(name) => self.trusted_header = Some(name),
            Err(error) => warn!(header, %error, "ignoring invalid trusted header name"),
        }
        self
    }

    /// Build from auth settings.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let resolver = Self::new(settings.tokens.clone());
        match settings.trusted_header.as_deref() {
            Some(header) => resolver.with_trusted_header(header),
            None => resolver,
        }
    }

    fn lookup(&self, token: &str) -> Option<PrincipalId> {
        self.tokens.get(token).cloned()
    }
}

#[async_trait]
impl IdentityResolver for TokenIdentityResolver {
    async fn resolve(&self, handshake: &HandshakeContext) -> Option<PrincipalId> {
        if let Some(name) = &self.trusted_header {
            if let Some(principal) = PrincipalId::parse(handshake.header(name)) {
                debug!(%principal, "principal from trusted header");
                return Some(principal);
            }
        }

        let token = handshake
            .bearer_token()
            .or_else(|| handshake.cookie(SESSION_COOKIE))
            .or_else(|| handshake.query_param(TOKEN_QUERY_PARAM).map(str::to_owned))?;

        let principal = self.lookup(&token);
        if principal.is_none() {
            debug!("handshake token did not match any principal");
        }
        principal
    }
}

//! Handshake identity settings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What to do with the `Authentication required` error when a request
/// arrives without a principal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnauthenticatedReply {
    /// Log and drop; there is no room to deliver to.
    #[default]
    Drop,
    /// Send the error only to the connection that made the request.
    Unicast,
}

/// Identity resolution settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Session/bearer token to principal ID.
    pub tokens: HashMap<String, String>,
    /// Header set by an upstream authenticating proxy that carries the
    /// principal ID directly (e.g. `x-principal-id`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_header: Option<String>,
    /// Delivery policy for the unauthenticated-request error.
    pub unauthenticated_reply: UnauthenticatedReply,
}

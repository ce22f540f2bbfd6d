//! Strongly typed request-scoped values.
//!
//! Stages hand these to each other (and to handlers) through request extensions, one
//! type per concern, so a handler asks for `Extension<Identity>` instead of digging
//! through an untyped map.
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Set by the trace stage; never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub request_id: String,
    pub addr: ClientAddr,
}

/// Caller addresses used for forensic logging and audit records.
///
/// - `client_ip`: first forwarded hop, `X-Real-IP`, then the socket peer
/// - `remote_ip`: raw `X-Real-IP`, raw `X-Forwarded-For`, then `client_ip`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAddr {
    pub client_ip: String,
    pub remote_ip: String,
}

impl ClientAddr {
    pub fn resolve(headers: &HeaderMap, extensions: &Extensions) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let client_ip = header("x-forwarded-for")
            .and_then(|s| s.split(',').next())
            .or_else(|| header("x-real-ip"))
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .or_else(|| {
                extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ci| ci.0.ip())
            })
            .map(|ip| ip.to_string())
            .unwrap_or_default();

        let remote_ip = header("x-real-ip")
            .or_else(|| header("x-forwarded-for"))
            .map(str::to_string)
            .unwrap_or_else(|| client_ip.clone());

        Self {
            client_ip,
            remote_ip,
        }
    }
}

/// Decoded payload of a verified credential, published by the credential stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// A string claim, as is.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// True when the claim carries text: a non-blank string, or (for `aud`) an array
    /// holding at least one non-blank string.
    pub fn has_text(&self, name: &str) -> bool {
        match self.0.get(name) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(items)) => items
                .iter()
                .any(|v| v.as_str().is_some_and(|s| !s.trim().is_empty())),
            _ => false,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }
}

/// Data-isolation scope for nested calls made while serving the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeContext {
    pub namespace: String,
    pub tenant: String,
    pub account: String,
    pub operator: String,
}

/// Server-generated id of the resource a POST created.
///
/// Handlers put it in the response extensions when they do not set the `TargetId`
/// header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetId(pub String);

/// Mini-program session fields read from the token cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionClaims {
    pub open_id: String,
    pub account_id: String,
    pub union_id: String,
    pub session_key: String,
}

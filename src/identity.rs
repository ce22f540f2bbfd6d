//! Canonical per-request principal and its two wire forms.
//!
//! - the opaque blob `base64(JSON(Identity))` issued at login and carried in the `iss`
//!   claim of login-issued tokens
//! - the header set a trusted upstream (or this pipeline) writes onto the request
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NAMESPACE: HeaderName = HeaderName::from_static("namespace");
pub const MERCHANT_ID: HeaderName = HeaderName::from_static("merchantid");
pub const ACCOUNT_ID: HeaderName = HeaderName::from_static("accountid");
pub const USER_ID: HeaderName = HeaderName::from_static("userid");
pub const USER_NAME: HeaderName = HeaderName::from_static("username");
pub const PHONE: HeaderName = HeaderName::from_static("phone");
pub const AVATAR: HeaderName = HeaderName::from_static("avatar");
pub const LOGIN_TYPE: HeaderName = HeaderName::from_static("logintype");
pub const LOGIN_LEVEL: HeaderName = HeaderName::from_static("loginlevel");

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("identity payload is not valid: {0}")]
    Json(#[from] serde_json::Error),
}

/// The caller as seen by every stage after identity propagation.
///
/// Missing keys decode to empty strings, so a blob produced by an older issuer still
/// loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub namespace: String,
    #[serde(rename = "merchant-id")]
    pub merchant_id: String,
    pub account_id: String,
    pub phone: String,
    pub user_id: String,
    pub user_name: String,
    pub avatar: String,
    pub login_type: String,
    pub login_level: String,
}

impl Identity {
    /// Encode into the opaque blob carried by login-issued tokens.
    pub fn dump(&self) -> Result<String, IdentityError> {
        let payload = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(payload))
    }

    /// Decode a blob produced by [`Identity::dump`].
    pub fn load(blob: &str) -> Result<Self, IdentityError> {
        let payload = STANDARD.decode(blob.trim())?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Re-derive the identity from headers set by a trusted upstream.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &HeaderName| {
            headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default()
        };

        Self {
            namespace: read(&NAMESPACE),
            merchant_id: read(&MERCHANT_ID),
            account_id: read(&ACCOUNT_ID),
            phone: read(&PHONE),
            user_id: read(&USER_ID),
            user_name: read(&USER_NAME),
            avatar: read(&AVATAR),
            login_type: read(&LOGIN_TYPE),
            login_level: read(&LOGIN_LEVEL),
        }
    }

    /// Write every field except the merchant scope, which is owned by tenant resolution.
    ///
    /// Values that cannot be carried in a header (control characters) are cleared
    /// rather than forwarded stale.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        let fields = [
            (NAMESPACE, &self.namespace),
            (ACCOUNT_ID, &self.account_id),
            (USER_ID, &self.user_id),
            (USER_NAME, &self.user_name),
            (PHONE, &self.phone),
            (AVATAR, &self.avatar),
            (LOGIN_TYPE, &self.login_type),
            (LOGIN_LEVEL, &self.login_level),
        ];

        for (name, value) in fields {
            set_header(headers, name, value);
        }
    }
}

pub(crate) fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_bytes(value.as_bytes()) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => {
            tracing::warn!(header = %name, "value cannot be carried in a header; cleared");
            headers.insert(name, HeaderValue::from_static(""));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Identity {
        Identity {
            namespace: "ns1".into(),
            merchant_id: "M1".into(),
            account_id: "u1".into(),
            phone: "+81-90-0000-0000".into(),
            user_id: "65a0c0ffee".into(),
            user_name: "山田 太郎".into(),
            avatar: "https://cdn.example.com/a.png".into(),
            login_type: "password".into(),
            login_level: "3".into(),
        }
    }

    #[test]
    fn blob_round_trips_all_fields() {
        let identity = sample();
        let blob = identity.dump().unwrap();
        assert_eq!(Identity::load(&blob).unwrap(), identity);
    }

    #[test]
    fn blob_round_trips_empty_fields() {
        let identity = Identity {
            account_id: "u1".into(),
            ..Identity::default()
        };
        assert_eq!(Identity::load(&identity.dump().unwrap()).unwrap(), identity);
        assert_eq!(
            Identity::load(&Identity::default().dump().unwrap()).unwrap(),
            Identity::default()
        );
    }

    #[test]
    fn blob_uses_login_wire_names() {
        let blob = STANDARD.encode(r#"{"namespace":"ns1","merchant-id":"M1","account_id":"u1"}"#);
        let identity = Identity::load(&blob).unwrap();
        assert_eq!(identity.namespace, "ns1");
        assert_eq!(identity.merchant_id, "M1");
        assert_eq!(identity.account_id, "u1");
        assert!(identity.user_name.is_empty());
    }

    #[test]
    fn load_rejects_bad_base64() {
        assert!(matches!(
            Identity::load("not base64!!"),
            Err(IdentityError::Base64(_))
        ));
    }

    #[test]
    fn load_rejects_invalid_structure() {
        let blob = STANDARD.encode("[not json");
        assert!(matches!(Identity::load(&blob), Err(IdentityError::Json(_))));

        let blob = STANDARD.encode(r#"{"account_id": 42}"#);
        assert!(matches!(Identity::load(&blob), Err(IdentityError::Json(_))));
    }

    #[test]
    fn headers_round_trip_including_utf8() {
        let identity = sample();
        let mut headers = HeaderMap::new();
        identity.write_headers(&mut headers);
        headers.insert(MERCHANT_ID, HeaderValue::from_static("M1"));

        assert_eq!(Identity::from_headers(&headers), identity);
    }

    #[test]
    fn control_characters_are_cleared() {
        let identity = Identity {
            user_name: "bad\nname".into(),
            ..sample()
        };
        let mut headers = HeaderMap::new();
        identity.write_headers(&mut headers);
        assert_eq!(headers.get(USER_NAME).unwrap(), "");
    }
}

//! End-to-end runs of the full router against in-memory backends.
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use edge_guard::app::build_router;
use edge_guard::config::Config;
use edge_guard::identity::Identity;
use edge_guard::middleware::auth::access::SubjectKey;
use edge_guard::middleware::auth::identity::IdentitySource;
use edge_guard::services::audit::{AuditPhase, MemoryAuditStore};
use edge_guard::services::auth::JwtIssuer;
use edge_guard::services::cache::MemoryCache;
use edge_guard::state::AppState;

const SECRET: &str = "pipeline-test-secret";
const GATEWAY_SECRET: &str = "pipeline-gateway-secret";

struct Harness {
    cache: Arc<MemoryCache>,
    audit: Arc<MemoryAuditStore>,
    app: Router,
}

fn harness_with(config: Config) -> Harness {
    let cache = Arc::new(MemoryCache::new());
    let audit = Arc::new(MemoryAuditStore::new());
    let state = AppState::new(&config, cache.clone(), audit.clone());
    let app = build_router(state, &config);
    Harness { cache, audit, app }
}

fn config() -> Config {
    let mut config = Config::with_secret(SECRET);
    config.upstream_secret = Some(GATEWAY_SECRET.to_string());
    config
}

fn harness() -> Harness {
    harness_with(config())
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn request_id(response: &Response) -> String {
    response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// Sign in through the trusted-upstream route and return the issued token.
async fn sign_in(h: &Harness) -> String {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/signin")
        .header(header::CONTENT_TYPE, "application/json")
        .header("accountid", "acc-1")
        .header("userid", "u1")
        .header("username", "alice")
        .header("namespace", "ns1")
        .header("x-upstream-secret", GATEWAY_SECRET)
        .body(Body::from(r#"{"name":"alice","login_type":"password"}"#))
        .unwrap();

    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("jwt="));

    let body = json_body(response).await;
    assert_eq!(body["token_type"], "Bearer");
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_bypasses_the_pipeline_but_is_traced() {
    let h = harness();
    let req = Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap();
    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(request_id(&response).len(), 32);
}

#[tokio::test]
async fn missing_credential_is_401_with_request_id_and_no_audit() {
    let h = harness();
    let req = Request::builder()
        .method(Method::PUT)
        .uri("/api/v1/orders/42")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"quantity":1}"#))
        .unwrap();

    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "MISSING_CREDENTIAL");
    assert!(h.audit.operations().is_empty());
}

#[tokio::test]
async fn sign_in_is_audited_with_the_upstream_identity() {
    let h = harness();
    sign_in(&h).await;

    let logins = h.audit.logins();
    assert_eq!(logins.len(), 1);
    let login = &logins[0];
    assert_eq!(login.account_id, "acc-1");
    assert_eq!(login.user_id, "u1");
    assert_eq!(login.merchant_id, "ns1");
    assert_eq!(login.sign_in_name, "alice");
    assert_eq!(login.login_type, "password");
    assert_eq!(login.full_path, "/api/v1/auth/signin");
    assert_eq!(login.resp_code, 200);
    assert_eq!(login.request_id.len(), 32);
}

fn forged_admin_sign_in(gateway_secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/auth/signin")
        .header(header::CONTENT_TYPE, "application/json")
        .header("accountid", "admin")
        .header("userid", "admin");
    if let Some(secret) = gateway_secret {
        builder = builder.header("x-upstream-secret", secret);
    }
    builder.body(Body::from("{}")).unwrap()
}

#[tokio::test]
async fn sign_in_without_the_gateway_secret_is_rejected() {
    let h = harness();
    h.cache.hset("rbam:admin", "DELETE:/api/v1/orders/{id}", "1");

    for secret in [None, Some("guessed")] {
        let response = send(&h.app, forged_admin_sign_in(secret)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(json_body(response).await["error"]["code"], "UNTRUSTED_UPSTREAM");
    }
    assert!(h.audit.logins().is_empty());
}

#[tokio::test]
async fn sign_in_is_closed_when_no_gateway_secret_is_configured() {
    let h = harness_with(Config::with_secret(SECRET));
    let response = send(&h.app, forged_admin_sign_in(Some(""))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authorized_update_runs_with_tenant_scope_and_is_audited_twice() {
    let h = harness();
    let token = sign_in(&h).await;
    h.cache.hset("rbam:u1", "PUT:/api/v1/orders/{id}", "1");
    h.cache.set("merchant2tenant:M1", "T1");

    let req = Request::builder()
        .method(Method::PUT)
        .uri("/api/v1/orders/42")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-merchant-id", "M1")
        .body(Body::from(r#"{"quantity":3}"#))
        .unwrap();

    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rid = request_id(&response);
    let body = json_body(response).await;
    assert_eq!(body["id"], "42");
    assert_eq!(body["tenant"], "T1");
    assert_eq!(body["operator"], "u1");

    let records = h.audit.operations();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].phase, AuditPhase::Attempt);
    assert_eq!(records[1].phase, AuditPhase::Outcome);
    for record in &records {
        assert_eq!(record.full_path, "/api/v1/orders");
        assert_eq!(record.target_id, "42");
        assert_eq!(record.operator, "alice");
        assert_eq!(record.request_id, rid);
    }
}

#[tokio::test]
async fn denied_requests_get_the_store_status_and_never_reach_the_handler() {
    let h = harness();
    let token = sign_in(&h).await;

    let delete = |token: &str| {
        Request::builder()
            .method(Method::DELETE)
            .uri("/api/v1/orders/42")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&h.app, delete(&token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"]["code"], "PERMISSION_DENIED");

    h.cache.hset("rbam:u1", "DELETE:/api/v1/orders/{id}", "402");
    let response = send(&h.app, delete(&token)).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    assert!(h.audit.operations().is_empty());
}

#[tokio::test]
async fn created_orders_are_audited_with_the_new_id() {
    let h = harness();
    let token = sign_in(&h).await;
    h.cache.hset("rbam:u1", "POST:/api/v1/orders", "true");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/orders")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"item":"coffee","quantity":2}"#))
        .unwrap();

    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let target = response
        .headers()
        .get("targetid")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let records = h.audit.operations();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].phase, AuditPhase::Outcome);
    assert_eq!(records[0].target_id, target);
    assert_eq!(records[0].status, Some(201));
}

#[tokio::test]
async fn cached_blob_reference_is_resolved_for_the_handler() {
    let mut config = config();
    config.identity_source = IdentitySource::CachedBlob {
        prefix: "identity_blob".into(),
    };
    config.subject_key = SubjectKey::AccountId;
    let h = harness_with(config);

    let blob = Identity {
        account_id: "u1".into(),
        namespace: "ns1".into(),
        ..Identity::default()
    }
    .dump()
    .unwrap();
    h.cache.set("identity_blob:blob1", blob);
    h.cache.hset("rbam:u1", "GET:/api/v1/me", "1");

    let token = JwtIssuer::new(SECRET.as_bytes(), "app", 3600)
        .sign(&json!({"sub": "u1", "iss": "blob1", "aud": "app", "jti": "t1"}))
        .unwrap();

    let req = Request::builder()
        .uri("/api/v1/me")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["identity"]["account_id"], "u1");
    assert_eq!(body["identity"]["namespace"], "ns1");
    assert_eq!(body["scope"]["account"], "u1");
}

#[tokio::test]
async fn cookie_credentials_work_for_browser_deployments() {
    let mut config = config();
    config.credential_source = edge_guard::middleware::auth::credential::CredentialSource::cookie();
    let h = harness_with(config);
    let token = sign_in(&h).await;
    h.cache.hset("rbam:u1", "GET:/api/v1/me", "1");

    let req = Request::builder()
        .uri("/api/v1/me")
        .header(header::COOKIE, format!("jwt={token}"))
        .body(Body::empty())
        .unwrap();

    let response = send(&h.app, req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["identity"]["user_name"], "alice");
}

#[tokio::test]
async fn session_token_route_requires_every_field() {
    let h = harness();
    for (field, value) in [
        ("OPEN_ID", "o-1"),
        ("ACCOUNT_ID", "a-1"),
        ("UNION_ID", "un-1"),
    ] {
        h.cache.hset("wx_tokens_abc", field, value);
    }

    let profile = || {
        Request::builder()
            .uri("/api/v1/session/profile")
            .header("token", "abc")
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&h.app, profile()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"]["code"], "CACHE_FIELD_MISSING");

    h.cache.hset("wx_tokens_abc", "SESSION_KEY", "sk-1");
    let response = send(&h.app, profile()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["open_id"], "o-1");
    assert!(body.get("session_key").is_none());
}

//! Audit stage: login events and operation (mutation) records.
//!
//! Both paths are best-effort. A failed or slow write is logged together with the
//! record and the response goes out unchanged.
//!
//! Operation records:
//! - PUT / PATCH / DELETE: `attempt` before the handler, `outcome` after
//! - POST: `outcome` only, with the target id the handler created
//! - everything else: not recorded
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, State},
    http::{HeaderName, Method, Request},
    middleware::{self, Next},
    response::Response,
};
use chrono::Utc;
use http_body_util::LengthLimitError;
use serde::Deserialize;
use uuid::Uuid;

use crate::context::{TargetId, TraceContext};
use crate::error::AppError;
use crate::identity::Identity;
use crate::middleware::{client_addr_of, route_of};
use crate::services::audit::{AuditPhase, AuditStore, LoginRecord, OperationRecord};

pub const TARGET_ID_HEADER: HeaderName = HeaderName::from_static("targetid");
pub const DEFAULT_TARGET_PARAM: &str = "id";
pub const DEFAULT_LOGIN_BODY_LIMIT: usize = 64 * 1024;

#[derive(Clone)]
pub struct LoginAuditStage {
    store: Arc<dyn AuditStore>,
    skip_view_log: bool,
    body_limit: usize,
    call_timeout: Duration,
}

#[derive(Clone)]
pub struct OperationAuditStage {
    store: Arc<dyn AuditStore>,
    target_param: String,
    call_timeout: Duration,
}

pub fn apply_login<S>(router: Router<S>, stage: LoginAuditStage) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(stage, login_audit_middleware))
}

pub fn apply_operation<S>(router: Router<S>, stage: OperationAuditStage) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(stage, operation_audit_middleware))
}

/// Split a route template into the resource path used for grouping and the concrete
/// value of the `param` placeholder.
///
/// Both `{id}` and the legacy `:id` placeholder forms are recognised.
///
/// ```
/// use edge_guard::middleware::audit::split_target;
///
/// let (resource, target) = split_target("/orders/{id}", "/orders/42", "id");
/// assert_eq!(resource, "/orders");
/// assert_eq!(target, "42");
/// ```
pub fn split_target(template: &str, path: &str, param: &str) -> (String, String) {
    let braced = format!("{{{param}}}");
    let legacy = format!(":{param}");

    let mut concrete = path.split('/');
    let mut resource = Vec::new();
    let mut target = String::new();

    for segment in template.split('/') {
        let actual = concrete.next();
        if segment == braced || segment == legacy {
            target = actual.unwrap_or_default().to_string();
            continue;
        }
        resource.push(segment);
    }

    let resource = resource.join("/");
    if resource.is_empty() {
        ("/".to_string(), target)
    } else {
        (resource, target)
    }
}

impl LoginAuditStage {
    pub fn new(store: Arc<dyn AuditStore>, skip_view_log: bool, call_timeout: Duration) -> Self {
        Self {
            store,
            skip_view_log,
            body_limit: DEFAULT_LOGIN_BODY_LIMIT,
            call_timeout,
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    async fn write(&self, record: LoginRecord) {
        match tokio::time::timeout(self.call_timeout, self.store.create_login(&record)).await {
            Ok(Ok(id)) => tracing::debug!(id = %id, "login audit stored"),
            Ok(Err(err)) => {
                tracing::error!(error = %err, record = ?record, "login audit write failed")
            }
            Err(_) => tracing::error!(record = ?record, "login audit write timed out"),
        }
    }
}

impl OperationAuditStage {
    pub fn new(store: Arc<dyn AuditStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            target_param: DEFAULT_TARGET_PARAM.to_string(),
            call_timeout,
        }
    }

    pub fn with_target_param(mut self, param: impl Into<String>) -> Self {
        self.target_param = param.into();
        self
    }

    async fn write(&self, record: OperationRecord) {
        match tokio::time::timeout(self.call_timeout, self.store.create_operation(&record)).await {
            Ok(Ok(id)) => tracing::debug!(id = %id, phase = record.phase.as_str(), "operation audit stored"),
            Ok(Err(err)) => {
                tracing::error!(error = %err, record = ?record, "operation audit write failed")
            }
            Err(_) => tracing::error!(record = ?record, "operation audit write timed out"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginForm {
    name: String,
    phone: String,
    login_type: String,
}

fn parse_login_form(body: &[u8]) -> Result<LoginForm, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(LoginForm::default());
    }
    serde_json::from_slice(body)
}

/// Map a failed body read: only an exceeded limit is a 413.
fn body_read_error(err: axum::Error) -> AppError {
    let mut source: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return AppError::PayloadTooLarge;
        }
        source = cause.source();
    }
    tracing::warn!(error = %err, "login body could not be read");
    AppError::bad_request("UNREADABLE_BODY", "request body could not be read")
}

fn request_id_of<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<TraceContext>()
        .map(|t| t.request_id.clone())
        .unwrap_or_default()
}

fn identity_of<B>(req: &Request<B>) -> Identity {
    req.extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_else(|| Identity::from_headers(req.headers()))
}

async fn login_audit_middleware(
    State(stage): State<LoginAuditStage>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if stage.skip_view_log && req.method() == Method::GET {
        return Ok(next.run(req).await);
    }

    let route = route_of(&req);
    let addr = client_addr_of(&req);
    let request_id = request_id_of(&req);
    let fallback = identity_of(&req);

    // handler と audit の両方で body を読むため、一度バッファする
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, stage.body_limit)
        .await
        .map_err(body_read_error)?;
    let req = Request::from_parts(parts, Body::from(bytes.clone()));

    let response = next.run(req).await;

    let form = match parse_login_form(&bytes) {
        Ok(form) => form,
        Err(err) => {
            tracing::warn!(request_path = %route, error = %err, "login body not recorded");
            return Ok(response);
        }
    };

    let identity = response
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or(fallback);

    let now = Utc::now();
    let sign_in_name = if form.name.is_empty() { form.phone } else { form.name };
    let login_type = if form.login_type.is_empty() {
        identity.login_type.clone()
    } else {
        form.login_type
    };

    let record = LoginRecord {
        id: Uuid::new_v4(),
        access_level: identity.login_level.trim().parse().unwrap_or(0),
        merchant_id: identity.namespace,
        account_id: identity.account_id,
        user_id: identity.user_id,
        user_name: identity.user_name,
        login_type,
        sign_in_name,
        client_ip: addr.client_ip,
        remote_ip: addr.remote_ip,
        full_path: route,
        resp_code: response.status().as_u16(),
        request_id,
        created_at: now,
        updated_at: now,
    };

    stage.write(record).await;

    Ok(response)
}

async fn operation_audit_middleware(
    State(stage): State<OperationAuditStage>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let pre_record = method == Method::PUT || method == Method::PATCH || method == Method::DELETE;

    if !pre_record && method != Method::POST {
        tracing::debug!(method = %method, "read-only request; not audited");
        return next.run(req).await;
    }

    let template = route_of(&req);
    // nest() 配下では uri から prefix が外れるので、MatchedPath と揃う OriginalUri を使う
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let (resource, path_target) = split_target(&template, &path, &stage.target_param);

    let identity = identity_of(&req);
    let addr = client_addr_of(&req);
    let request_target = req.extensions().get::<TargetId>().cloned();

    let base = OperationRecord {
        id: Uuid::nil(),
        phase: AuditPhase::Attempt,
        method: method.to_string(),
        full_path: resource,
        target_id: path_target,
        operator: identity.user_name,
        account_id: identity.account_id,
        namespace: identity.namespace,
        client_ip: addr.client_ip,
        remote_ip: addr.remote_ip,
        status: None,
        request_id: request_id_of(&req),
        timestamp: Utc::now(),
    };

    if pre_record {
        stage
            .write(OperationRecord {
                id: Uuid::new_v4(),
                ..base.clone()
            })
            .await;
    }

    let response = next.run(req).await;

    let target_id = if pre_record {
        base.target_id.clone()
    } else {
        response
            .headers()
            .get(&TARGET_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| response.extensions().get::<TargetId>().map(|t| t.0.clone()))
            .or_else(|| request_target.map(|t| t.0))
            .unwrap_or_default()
    };

    stage
        .write(OperationRecord {
            id: Uuid::new_v4(),
            phase: AuditPhase::Outcome,
            target_id,
            status: Some(response.status().as_u16()),
            timestamp: Utc::now(),
            ..base
        })
        .await;

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::{AuditError, LoginRecord, MemoryAuditStore};
    use async_trait::async_trait;
    use axum::{
        Extension,
        body::Bytes,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post, put},
    };
    use futures_util::stream;
    use std::io;
    use tower::ServiceExt;

    struct Unavailable;

    #[async_trait]
    impl AuditStore for Unavailable {
        fn backend_name(&self) -> &'static str {
            "unavailable"
        }

        async fn create_login(&self, _: &LoginRecord) -> Result<String, AuditError> {
            Err(AuditError::Db(sqlx::Error::PoolTimedOut))
        }

        async fn create_operation(&self, _: &OperationRecord) -> Result<String, AuditError> {
            Err(AuditError::Db(sqlx::Error::PoolTimedOut))
        }
    }

    fn operator() -> Identity {
        Identity {
            user_name: "alice".into(),
            account_id: "acc-1".into(),
            namespace: "ns1".into(),
            ..Identity::default()
        }
    }

    fn orders(store: Arc<dyn AuditStore>) -> Router {
        let router = Router::new()
            .route("/orders/{id}", put(|| async { "updated" }).get(|| async { "order" }))
            .route(
                "/orders",
                post(|| async { (StatusCode::CREATED, [(TARGET_ID_HEADER, "o-9")]) }),
            )
            .route(
                "/drafts",
                post(|| async {
                    let mut response = StatusCode::CREATED.into_response();
                    response.extensions_mut().insert(TargetId("d-3".into()));
                    response
                }),
            );
        apply_operation(router, OperationAuditStage::new(store, Duration::from_secs(1)))
            .layer(Extension(operator()))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn put_records_attempt_and_outcome_with_template_path() {
        let store = Arc::new(MemoryAuditStore::new());
        let response = orders(store.clone())
            .oneshot(request(Method::PUT, "/orders/42"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let records = store.operations();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].phase, AuditPhase::Attempt);
        assert_eq!(records[0].status, None);
        assert_eq!(records[1].phase, AuditPhase::Outcome);
        assert_eq!(records[1].status, Some(200));
        for record in &records {
            assert_eq!(record.full_path, "/orders");
            assert_eq!(record.target_id, "42");
            assert_eq!(record.method, "PUT");
            assert_eq!(record.operator, "alice");
            assert_eq!(record.namespace, "ns1");
        }
        assert_ne!(records[0].id, records[1].id);
    }

    #[tokio::test]
    async fn failing_store_does_not_change_the_response() {
        let response = orders(Arc::new(Unavailable))
            .oneshot(request(Method::PUT, "/orders/42"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn post_records_outcome_with_created_target() {
        let store = Arc::new(MemoryAuditStore::new());
        let app = orders(store.clone());

        let response = app.clone().oneshot(request(Method::POST, "/orders")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app.oneshot(request(Method::POST, "/drafts")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let records = store.operations();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.phase == AuditPhase::Outcome));
        assert_eq!(records[0].full_path, "/orders");
        assert_eq!(records[0].target_id, "o-9");
        assert_eq!(records[0].status, Some(201));
        assert_eq!(records[1].target_id, "d-3");
    }

    #[tokio::test]
    async fn reads_are_not_recorded() {
        let store = Arc::new(MemoryAuditStore::new());
        let response = orders(store.clone())
            .oneshot(request(Method::GET, "/orders/42"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn nested_routes_keep_their_prefix() {
        let store = Arc::new(MemoryAuditStore::new());
        let app = Router::new().nest("/api/v1", orders(store.clone()));
        app.oneshot(request(Method::PUT, "/api/v1/orders/7"))
            .await
            .unwrap();

        let records = store.operations();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].full_path, "/api/v1/orders");
        assert_eq!(records[1].target_id, "7");
    }

    #[test]
    fn split_target_handles_both_placeholder_forms() {
        assert_eq!(
            split_target("/orders/:id", "/orders/42", "id"),
            ("/orders".to_string(), "42".to_string())
        );
        assert_eq!(
            split_target("/shops/{shop}/orders/{id}", "/shops/s1/orders/42", "id"),
            ("/shops/{shop}/orders".to_string(), "42".to_string())
        );
        assert_eq!(
            split_target("/orders", "/orders", "id"),
            ("/orders".to_string(), String::new())
        );
        assert_eq!(
            split_target("/{id}", "/42", "id"),
            ("/".to_string(), "42".to_string())
        );
    }

    fn signin(store: Arc<dyn AuditStore>, skip_view_log: bool) -> Router {
        let router = Router::new().route(
            "/signin",
            post(|body: String| async move {
                let mut response = body.into_response();
                response.extensions_mut().insert(Identity {
                    account_id: "acc-7".into(),
                    user_id: "u7".into(),
                    namespace: "ns7".into(),
                    login_level: "3".into(),
                    ..Identity::default()
                });
                response
            })
            .get(|| async { "form" }),
        );
        let stage = LoginAuditStage::new(store, skip_view_log, Duration::from_secs(1))
            .with_body_limit(64);
        apply_login(router, stage)
    }

    fn signin_post(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/signin")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn login_is_recorded_and_body_is_replayed() {
        let store = Arc::new(MemoryAuditStore::new());
        let payload = r#"{"name":"alice","login_type":"password"}"#;
        let response = signin(store.clone(), true)
            .oneshot(signin_post(payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&echoed[..], payload.as_bytes());

        let logins = store.logins();
        assert_eq!(logins.len(), 1);
        let login = &logins[0];
        assert_eq!(login.sign_in_name, "alice");
        assert_eq!(login.login_type, "password");
        assert_eq!(login.account_id, "acc-7");
        assert_eq!(login.merchant_id, "ns7");
        assert_eq!(login.access_level, 3);
        assert_eq!(login.full_path, "/signin");
        assert_eq!(login.resp_code, 200);
    }

    #[tokio::test]
    async fn login_view_is_skipped_when_configured() {
        let store = Arc::new(MemoryAuditStore::new());
        let req = request(Method::GET, "/signin");
        signin(store.clone(), true).oneshot(req).await.unwrap();
        assert!(store.logins().is_empty());

        let req = request(Method::GET, "/signin");
        signin(store.clone(), false).oneshot(req).await.unwrap();
        assert_eq!(store.logins().len(), 1);
    }

    #[tokio::test]
    async fn unparsable_login_body_is_not_recorded() {
        let store = Arc::new(MemoryAuditStore::new());
        let response = signin(store.clone(), true)
            .oneshot(signin_post("name=alice"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.logins().is_empty());
    }

    #[tokio::test]
    async fn oversized_login_body_is_413() {
        let store = Arc::new(MemoryAuditStore::new());
        let big = format!(r#"{{"name":"{}"}}"#, "a".repeat(128));
        let response = signin(store.clone(), true)
            .oneshot(signin_post(&big))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn aborted_login_body_is_400_not_413() {
        let store = Arc::new(MemoryAuditStore::new());
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(br#"{"na"#)),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let req = Request::builder()
            .method(Method::POST)
            .uri("/signin")
            .header("content-type", "application/json")
            .body(Body::from_stream(stream::iter(chunks)))
            .unwrap();

        let response = signin(store.clone(), true).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.logins().is_empty());
    }

    #[tokio::test]
    async fn failing_login_store_does_not_change_the_response() {
        let response = signin(Arc::new(Unavailable), true)
            .oneshot(signin_post(r#"{"phone":"555"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

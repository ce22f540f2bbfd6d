/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - route ごとにどの stage を通すかをここで決める
 *   - /health: なし
 *   - /auth/signin: upstream guard → identity (bind-only) → login audit
 *   - /me, /orders: credential → identity → access → operation audit
 *   - /session/profile: session token
 * - route_layer は後から掛けたものが外側になるので、内側の stage から順に積む
 */
use axum::{
    Router,
    routing::{get, post, put},
};

use crate::api::v1::handlers::{
    auth::sign_in,
    health::health,
    me::{me, session_profile},
    orders::{create_order, delete_order, update_order},
};
use crate::middleware::{audit, auth};
use crate::state::AppState;

pub fn routes(state: &AppState) -> Router<AppState> {
    let sign_in_routes = Router::new().route("/auth/signin", post(sign_in));
    let sign_in_routes = audit::apply_login(sign_in_routes, state.login_audit_stage());
    let sign_in_routes = auth::identity::apply(sign_in_routes, state.bind_only_stage());
    let sign_in_routes = auth::upstream::apply(sign_in_routes, state.upstream_guard());

    let protected = Router::new()
        .route("/me", get(me))
        .route("/orders", post(create_order))
        .route("/orders/{id}", put(update_order).delete(delete_order));
    let protected = audit::apply_operation(protected, state.operation_audit_stage());
    let protected = auth::access::apply(protected, state.access_stage());
    let protected = auth::identity::apply(protected, state.identity_stage());
    let protected = auth::credential::apply(protected, state.credential_stage());

    let session = Router::new().route("/session/profile", get(session_profile));
    let session = auth::session_token::apply(session, state.session_token_stage());

    Router::new()
        .route("/health", get(health))
        .merge(sign_in_routes)
        .merge(protected)
        .merge(session)
}

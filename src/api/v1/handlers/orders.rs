/*
 * Responsibility
 * - /orders 系 mutation handler (operation audit の対象)
 * - POST は採番した id を TargetId header で返す
 * - 永続化は持たない (scope と operator を返すだけ)
 */
use axum::{
    Extension, Json,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::api::v1::dto::orders::{CreateOrderRequest, OrderResponse, UpdateOrderRequest};
use crate::context::ScopeContext;
use crate::error::AppError;
use crate::middleware::audit::TARGET_ID_HEADER;

pub async fn create_order(
    Extension(scope): Extension<ScopeContext>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()
        .map_err(|msg| AppError::bad_request("INVALID_ORDER", msg))?;

    let id = Uuid::new_v4().to_string();

    Ok((
        StatusCode::CREATED,
        [(TARGET_ID_HEADER, id.clone())],
        Json(OrderResponse {
            id,
            item: Some(req.item),
            quantity: req.quantity,
            tenant: scope.tenant,
            operator: scope.operator,
        }),
    ))
}

pub async fn update_order(
    Extension(scope): Extension<ScopeContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateOrderRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    req.validate()
        .map_err(|msg| AppError::bad_request("INVALID_ORDER", msg))?;

    Ok(Json(OrderResponse {
        id,
        item: None,
        quantity: req.quantity,
        tenant: scope.tenant,
        operator: scope.operator,
    }))
}

pub async fn delete_order(Path(id): Path<String>) -> StatusCode {
    tracing::debug!(order_id = %id, "order deleted");
    StatusCode::NO_CONTENT
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AdminUser, AuthenticatedUser},
    entities::return_request::ReturnStatus,
    errors::ServiceError,
    services::returns::ReturnLine,
    AppState,
};

use super::validate_input;

// Serialize is required by the length validation on the containing list.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnLineRequest {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequestReturnRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub items: Vec<ReturnLineRequest>,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

/// POST /returns
pub async fn request_return(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<RequestReturnRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let lines = payload
        .items
        .into_iter()
        .map(|l| ReturnLine {
            variant_id: l.variant_id,
            quantity: l.quantity,
        })
        .collect();

    let created = state
        .services
        .returns
        .request_return(user.id, payload.order_id, lines, payload.reason)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /returns/check/{order_id}
///
/// Lets the storefront grey out the return button without fetching the
/// full return.
pub async fn check_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    // Ownership check keeps one customer from probing another's orders.
    state.services.orders.owned_order(order_id, user.id).await?;
    let exists = state.services.returns.exists_for_order(order_id).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "order_id": order_id, "exists": exists })),
    ))
}

/// GET /returns/me
pub async fn my_returns(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let returns = state.services.returns.my_returns(user.id).await?;
    Ok((StatusCode::OK, Json(returns)))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: ReturnStatus,
}

/// PUT /returns/{id}/status (admin)
pub async fn set_status(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(return_id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let updated = state
        .services
        .returns
        .set_status(return_id, payload.status)
        .await?;
    Ok((StatusCode::OK, Json(updated)))
}

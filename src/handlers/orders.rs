use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::{AdminUser, AuthenticatedUser},
    entities::order::FulfillmentStage,
    errors::ServiceError,
    AppState,
};

/// GET /orders/my
pub async fn my_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.services.orders.my_orders(user.id).await?;
    Ok((StatusCode::OK, Json(orders)))
}

/// GET /orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(order_id, user.id).await?;
    Ok((StatusCode::OK, Json(order)))
}

#[derive(Debug, Deserialize)]
pub struct SetStageRequest {
    pub stage: FulfillmentStage,
}

/// PUT /orders/{id}/stage (admin)
pub async fn set_stage(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<SetStageRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .set_fulfillment_stage(order_id, payload.stage)
        .await?;
    Ok((StatusCode::OK, Json(order)))
}

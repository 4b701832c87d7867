use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{auth::AuthenticatedUser, errors::ServiceError, AppState};

use super::validate_input;

/// GET /cart
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state.services.carts.view(user.id).await?;
    Ok((StatusCode::OK, Json(view)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

/// POST /cart/items
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let view = state
        .services
        .carts
        .add_item(user.id, payload.variant_id, payload.quantity)
        .await?;
    Ok((StatusCode::OK, Json(view)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetQuantityRequest {
    #[validate(range(min = 0, max = 100))]
    pub quantity: i32,
}

/// PUT /cart/items/{variant_id}
pub async fn set_quantity(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(variant_id): Path<Uuid>,
    Json(payload): Json<SetQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let view = state
        .services
        .carts
        .set_quantity(user.id, variant_id, payload.quantity)
        .await?;
    Ok((StatusCode::OK, Json(view)))
}

/// DELETE /cart
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_or_create(user.id).await?;
    state.services.carts.clear(cart.id).await?;
    let view = state.services.carts.view(user.id).await?;
    Ok((StatusCode::OK, Json(view)))
}

/// DELETE /cart/items/{variant_id}
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(variant_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let view = state.services.carts.remove_item(user.id, variant_id).await?;
    Ok((StatusCode::OK, Json(view)))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

/// GET /products/{id}/variants
///
/// Public: browsing the catalog needs no account.
pub async fn variants_by_colour(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let groups = state.services.catalog.variants_by_colour(product_id).await?;
    Ok((StatusCode::OK, Json(groups)))
}

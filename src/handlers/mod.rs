pub mod carts;
pub mod checkout;
pub mod orders;
pub mod products;
pub mod returns;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::{errors::ServiceError, AppState};

/// Validate a deserialized request body, mapping field errors to a 400.
pub(crate) fn validate_input<T: validator::Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// All routes under `/api/v1`, plus the unversioned health probe.
pub fn api_routes(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/checkout/apply-coupon", post(checkout::apply_coupon))
        .route("/checkout/orders", post(checkout::create_order))
        .route(
            "/checkout/payment/create-order",
            post(checkout::create_payment_intent),
        )
        .route("/checkout/payment/verify", post(checkout::verify_payment))
        .route("/cart", get(carts::get_cart).delete(carts::clear_cart))
        .route("/cart/items", post(carts::add_item))
        .route(
            "/cart/items/:variant_id",
            put(carts::set_quantity).delete(carts::remove_item),
        )
        .route("/orders/my", get(orders::my_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/stage", put(orders::set_stage))
        .route("/returns", post(returns::request_return))
        .route("/returns/me", get(returns::my_returns))
        .route("/returns/check/:order_id", get(returns::check_order))
        .route("/returns/:id/status", put(returns::set_status))
        .route("/products/:id/variants", get(products::variants_by_colour));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1)
        .with_state(state)
}

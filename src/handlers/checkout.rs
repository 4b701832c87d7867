use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    services::{
        checkout::{OrderTotals, PaymentProof},
        coupons::CouponEvaluation,
    },
    AppState,
};

use super::validate_input;

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApplyCouponResponse {
    Valid {
        valid: bool,
        coupon_code: String,
        discount: Decimal,
    },
    Invalid {
        valid: bool,
        message: String,
    },
}

/// POST /checkout/apply-coupon
///
/// Evaluation only; nothing is recorded until the order is placed.
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    if payload.amount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amount must not be negative".to_string(),
        ));
    }

    let evaluation = state
        .services
        .coupons
        .evaluate(&payload.coupon_code, payload.amount, user.id)
        .await?;

    let body = match evaluation {
        CouponEvaluation::Valid { code, discount } => ApplyCouponResponse::Valid {
            valid: true,
            coupon_code: code,
            discount,
        },
        CouponEvaluation::Invalid { message } => ApplyCouponResponse::Invalid {
            valid: false,
            message,
        },
    };

    Ok((StatusCode::OK, Json(body)))
}

/// Client's echo of a cart line. Accepted for forward compatibility but
/// ignored: the server-side cart is the source of truth for order lines.
#[derive(Debug, Deserialize)]
pub struct ClientLineEcho {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<ClientLineEcho>,
    pub subtotal: Decimal,
    #[validate(length(min = 1, max = 64))]
    pub coupon_code: Option<String>,
    pub discount: Decimal,
    pub total: Decimal,
}

/// POST /checkout/orders
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    if payload.discount < Decimal::ZERO || payload.total < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amounts must not be negative".to_string(),
        ));
    }

    let receipt = state
        .services
        .checkout
        .create_order(
            user.id,
            OrderTotals {
                total_mrp: payload.subtotal,
                coupon_code: payload.coupon_code,
                discount: payload.discount,
                total: payload.total,
            },
        )
        .await?;

    let status = if receipt.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
}

/// POST /checkout/payment/create-order
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let intent = state
        .services
        .checkout
        .create_payment_intent(payload.order_id, user.id, payload.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(intent)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// POST /checkout/payment/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let order = state
        .services
        .checkout
        .verify_payment(
            payload.order_id,
            user.id,
            PaymentProof {
                gateway_order_id: payload.gateway_order_id,
                gateway_payment_id: payload.gateway_payment_id,
                signature: payload.signature,
            },
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "order_id": order.id,
            "payment_stage": order.payment_stage,
            "fulfillment_stage": order.fulfillment_stage,
        })),
    ))
}

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use super::{AppState, Principal};
use crate::domain::aggregates::{Order, PaymentMethod, ShippingAddress};
use crate::error::ApiError;
use crate::lifecycle::{CheckoutRequest, CheckoutResult, ClientPaymentConfirmation};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 500))]
    pub delivery_notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

pub async fn create_order(
    State(s): State<AppState>,
    principal: Principal,
    Json(r): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutResult>), ApiError> {
    r.validate()?;
    let request = CheckoutRequest {
        user_id: principal.user_id,
        shipping_address: r.shipping_address,
        payment_method: r.payment_method,
        delivery_notes: r.delivery_notes,
    };
    let result = s.lifecycle.create_order_from_cart(request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn confirm_cod(State(s): State<AppState>, principal: Principal, Path(order_id): Path<String>) -> Result<Json<Order>, ApiError> {
    s.visible_order(&principal, &order_id).await?;
    Ok(Json(s.lifecycle.confirm_cod(&order_id).await?))
}

pub async fn verify_payment(
    State(s): State<AppState>,
    principal: Principal,
    Path(order_id): Path<String>,
    Json(r): Json<VerifyPaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    r.validate()?;
    s.visible_order(&principal, &order_id).await?;
    let confirmation = ClientPaymentConfirmation {
        provider_order_id: r.razorpay_order_id,
        payment_id: r.razorpay_payment_id,
        signature: r.razorpay_signature,
    };
    let order = s.lifecycle.record_client_payment(&order_id, confirmation).await?;
    Ok(Json(json!({ "message": "Payment verified successfully", "order": order })))
}

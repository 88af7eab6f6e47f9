use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::domain::aggregates::PaymentProvider;
use crate::gateway;
use crate::webhooks::IngestError;

/// Unauthenticated; the raw body is handed to signature verification untouched.
pub async fn razorpay(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    receive(&s, PaymentProvider::Razorpay, gateway::razorpay::SIGNATURE_HEADER, &headers, &body).await
}

pub async fn stripe(State(s): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    receive(&s, PaymentProvider::Stripe, gateway::stripe::SIGNATURE_HEADER, &headers, &body).await
}

async fn receive(s: &AppState, provider: PaymentProvider, signature_header: &str, headers: &HeaderMap, body: &[u8]) -> Response {
    let signature = headers.get(signature_header).and_then(|v| v.to_str().ok());
    match s.webhooks.ingest(provider, body, signature).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "message": "Webhook processed successfully" }))).into_response(),
        Err(IngestError::InvalidSignature) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "message": "Invalid signature", "code": "INVALID_SIGNATURE" }))).into_response()
        }
        Err(IngestError::Processing(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "Webhook processing failed" }))).into_response()
        }
    }
}

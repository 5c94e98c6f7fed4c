use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    entities::payment_transaction::ProviderKind,
    errors::ServiceError,
    services::payments::stripe::verify_signature,
    AppState,
};

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
pub const FLUTTERWAVE_HASH_HEADER: &str = "verif-hash";

fn parse_body(body: &Bytes) -> Result<Value, ServiceError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))
}

// POST /api/payments/mpesa/callback
#[utoipa::path(
    post,
    path = "/api/payments/mpesa/callback",
    request_body = String,
    responses(
        (status = 200, description = "Callback acknowledged"),
    ),
    tag = "Payments"
)]
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    // Daraja retries anything that is not acknowledged, so failures are only logged
    let result = match parse_body(&body) {
        Ok(payload) => {
            state
                .services
                .payments
                .handle_callback(ProviderKind::Mpesa, &payload)
                .await
        }
        Err(e) => Err(e),
    };
    match result {
        Ok(Some(tx)) => info!(transaction_id = %tx.id, status = %tx.status, "M-Pesa callback applied"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "M-Pesa callback could not be applied"),
    }
    Json(json!({"ResultCode": 0, "ResultDesc": "Accepted"}))
}

// POST /api/payments/stripe/webhook
#[utoipa::path(
    post,
    path = "/api/payments/stripe/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(stripe) = &state.config.stripe {
        if let Some(secret) = stripe.webhook_secret.as_deref() {
            let header = headers
                .get(STRIPE_SIGNATURE_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            let now = chrono::Utc::now().timestamp();
            if !verify_signature(header, &body, secret, stripe.webhook_tolerance_secs, now) {
                warn!("Stripe webhook signature verification failed");
                return Err(ServiceError::Unauthorized(
                    "invalid webhook signature".to_string(),
                ));
            }
        }
    }

    let payload = parse_body(&body)?;
    let applied = state
        .services
        .payments
        .handle_callback(ProviderKind::Stripe, &payload)
        .await?;
    if applied.is_none() {
        let event_type = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        info!(event_type, "Unhandled Stripe webhook type");
    }
    Ok((StatusCode::OK, Json(json!({"received": true}))))
}

// POST /api/payments/flutterwave/webhook
#[utoipa::path(
    post,
    path = "/api/payments/flutterwave/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid verif-hash", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn flutterwave_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let expected = state
        .config
        .flutterwave
        .as_ref()
        .and_then(|f| f.secret_hash.as_deref());
    if let Some(expected) = expected {
        let provided = headers
            .get(FLUTTERWAVE_HASH_HEADER)
            .map(|h| h.as_bytes())
            .unwrap_or_default();
        if !constant_time_eq(provided, expected.as_bytes()) {
            warn!("Flutterwave webhook hash mismatch");
            return Err(ServiceError::Unauthorized("invalid verif-hash".to_string()));
        }
    }

    let payload = parse_body(&body)?;
    state
        .services
        .payments
        .handle_callback(ProviderKind::Flutterwave, &payload)
        .await?;
    Ok((StatusCode::OK, Json(json!({"received": true}))))
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.iter().zip(b) {
        res |= x ^ y;
    }
    res == 0
}

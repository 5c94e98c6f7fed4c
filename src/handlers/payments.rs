use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    entities::payment_transaction::{self, ProviderKind},
    errors::ServiceError,
    services::payments::{ConfirmPaymentRequest, InitiatePaymentRequest, InitiatePaymentResponse},
    ApiResponse, AppState,
};

#[utoipa::path(
    post,
    path = "/api/payments/initiate",
    summary = "Initiate payment",
    description = "Opens a payment for the order's outstanding balance with the chosen provider",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 201, description = "Payment initiated", body = ApiResponse<InitiatePaymentResponse>),
        (status = 400, description = "Order already paid or cancelled, or provider not configured", body = crate::errors::ErrorResponse),
        (status = 402, description = "Provider declined the request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<InitiatePaymentResponse>>), ServiceError> {
    let initiated = state.services.payments.initiate(request).await?;
    Ok(created_response(initiated))
}

#[utoipa::path(
    get,
    path = "/api/payments/providers",
    responses(
        (status = 200, description = "Providers accepting payments", body = ApiResponse<Vec<ProviderKind>>),
    ),
    tag = "Payments"
)]
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ProviderKind>>>, ServiceError> {
    Ok(success_response(
        state.services.payments.available_providers(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment transaction id")),
    responses(
        (status = 200, description = "Payment retrieved", body = ApiResponse<payment_transaction::Model>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<payment_transaction::Model>>, ServiceError> {
    let payment = state.services.payments.get(id).await?;
    Ok(success_response(payment))
}

#[utoipa::path(
    get,
    path = "/api/payments/order/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payments for the order, newest first", body = ApiResponse<Vec<payment_transaction::Model>>),
    ),
    tag = "Payments"
)]
pub async fn list_order_payments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<payment_transaction::Model>>>, ServiceError> {
    let payments = state.services.payments.list_for_order(order_id).await?;
    Ok(success_response(payments))
}

#[utoipa::path(
    post,
    path = "/api/payments/{id}/confirm",
    summary = "Confirm manual payment",
    description = "Settles a bank transfer or cash-on-delivery payment",
    params(("id" = Uuid, Path, description = "Payment transaction id")),
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Payment settled", body = ApiResponse<payment_transaction::Model>),
        (status = 400, description = "Provider is not manual", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ApiResponse<payment_transaction::Model>>, ServiceError> {
    let payment = state.services.payments.confirm_manual(id, request).await?;
    Ok(success_response(payment))
}

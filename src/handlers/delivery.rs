use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::common::{created_response, success_response};
use crate::{
    errors::ServiceError,
    services::delivery::{
        CreateDeliveryLocationRequest, DeliveryLocation, DeliveryQuote, DeliveryQuoteRequest,
        UpdateDeliveryLocationRequest,
    },
    ApiResponse, AppState,
};

#[utoipa::path(
    get,
    path = "/api/delivery/locations",
    summary = "List delivery locations",
    description = "All delivery locations ordered by tier then name",
    responses(
        (status = 200, description = "Locations retrieved", body = ApiResponse<Vec<DeliveryLocation>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Delivery"
)]
pub async fn list_locations(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DeliveryLocation>>>, ServiceError> {
    let locations = state.services.delivery.list_locations().await?;
    Ok(success_response(locations))
}

#[utoipa::path(
    get,
    path = "/api/delivery/locations/{id}",
    params(("id" = String, Path, description = "Location id")),
    responses(
        (status = 200, description = "Location retrieved", body = ApiResponse<DeliveryLocation>),
        (status = 404, description = "Unknown location", body = crate::errors::ErrorResponse),
    ),
    tag = "Delivery"
)]
pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DeliveryLocation>>, ServiceError> {
    let location = state.services.delivery.get_location(&id).await?;
    Ok(success_response(location))
}

#[utoipa::path(
    post,
    path = "/api/delivery/quote",
    summary = "Quote delivery",
    description = "Shipping cost for a location and cart subtotal, including the free-shipping rule",
    request_body = DeliveryQuoteRequest,
    responses(
        (status = 200, description = "Quote computed", body = ApiResponse<DeliveryQuote>),
        (status = 400, description = "Express not available or invalid input", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown location", body = crate::errors::ErrorResponse),
    ),
    tag = "Delivery"
)]
pub async fn quote(
    State(state): State<AppState>,
    Json(request): Json<DeliveryQuoteRequest>,
) -> Result<Json<ApiResponse<DeliveryQuote>>, ServiceError> {
    let quote = state.services.delivery.quote(request).await?;
    Ok(success_response(quote))
}

#[utoipa::path(
    post,
    path = "/api/delivery/locations",
    request_body = CreateDeliveryLocationRequest,
    responses(
        (status = 201, description = "Location created", body = ApiResponse<DeliveryLocation>),
        (status = 400, description = "Invalid location", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate id or name", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Delivery"
)]
pub async fn create_location(
    State(state): State<AppState>,
    Json(request): Json<CreateDeliveryLocationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<DeliveryLocation>>), ServiceError> {
    let location = state.services.delivery.create_location(request).await?;
    Ok(created_response(location))
}

#[utoipa::path(
    put,
    path = "/api/delivery/locations/{id}",
    params(("id" = String, Path, description = "Location id")),
    request_body = UpdateDeliveryLocationRequest,
    responses(
        (status = 200, description = "Location updated", body = ApiResponse<DeliveryLocation>),
        (status = 400, description = "Invalid location", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown location", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Delivery"
)]
pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDeliveryLocationRequest>,
) -> Result<Json<ApiResponse<DeliveryLocation>>, ServiceError> {
    let location = state.services.delivery.update_location(&id, request).await?;
    Ok(success_response(location))
}

#[utoipa::path(
    delete,
    path = "/api/delivery/locations/{id}",
    params(("id" = String, Path, description = "Location id")),
    responses(
        (status = 204, description = "Location removed"),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown location", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Delivery"
)]
pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.services.delivery.delete_location(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

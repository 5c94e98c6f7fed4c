use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    entities::order,
    errors::ServiceError,
    services::orders::{
        CreateOrderRequest, CreateOrderResponse, OrderDetails, OrderListQuery,
        UpdateOrderStatusRequest,
    },
    ApiResponse, AppState, PaginatedResponse,
};

#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Create order",
    description = "Prices the cart, applies delivery and promo code, reserves stock and persists the order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<CreateOrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid order, promo rejected or express unavailable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown location, product or promo code", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateOrderResponse>>), ServiceError> {
    let created = state.services.orders.create_order(request).await?;
    Ok(created_response(created))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    summary = "Get order",
    description = "Retrieve an order by UUID or by its public order number (e.g. HP-20250101-ABC123)",
    params(("id" = String, Path, description = "Order id or order number")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderDetails>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let details = state.services.orders.get_order(&id).await?;
    Ok(success_response(details))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    summary = "List orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<order::Model>>),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<order::Model>>>, ServiceError> {
    let pagination = query.pagination();
    let (orders, total) = state
        .services
        .orders
        .list_orders(&pagination, query.status)
        .await?;
    Ok(success_response(pagination.into_response(orders, total)))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}/status",
    summary = "Update order status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<order::Model>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.orders.update_status(id, request).await?;
    Ok(success_response(order))
}

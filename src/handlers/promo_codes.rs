use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use super::common::{created_response, success_response, PaginationParams};
use crate::{
    entities::{promo_code, promo_code_usage},
    errors::ServiceError,
    services::promo_codes::{
        CreatePromoCodeRequest, UpdatePromoCodeRequest, ValidatePromoCodeRequest,
        ValidatePromoCodeResponse,
    },
    ApiResponse, AppState, PaginatedResponse,
};

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PromoCodeListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Only return active codes
    #[serde(default)]
    pub active_only: bool,
}

#[utoipa::path(
    post,
    path = "/api/promo-codes/validate",
    summary = "Validate promo code",
    description = "Checks a code against an order amount and returns the discount it would give",
    request_body = ValidatePromoCodeRequest,
    responses(
        (status = 200, description = "Code is applicable", body = ApiResponse<ValidatePromoCodeResponse>),
        (status = 400, description = "Code rejected (inactive, expired, minimum not met, limits)", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown code", body = crate::errors::ErrorResponse),
    ),
    tag = "Promo Codes"
)]
pub async fn validate_promo_code(
    State(state): State<AppState>,
    Json(request): Json<ValidatePromoCodeRequest>,
) -> Result<Json<ApiResponse<ValidatePromoCodeResponse>>, ServiceError> {
    let result = state.services.promo_codes.validate(request).await?;
    Ok(success_response(result))
}

#[utoipa::path(
    get,
    path = "/api/promo-codes",
    params(PromoCodeListQuery),
    responses(
        (status = 200, description = "Promo codes retrieved", body = ApiResponse<PaginatedResponse<promo_code::Model>>),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Promo Codes"
)]
pub async fn list_promo_codes(
    State(state): State<AppState>,
    Query(query): Query<PromoCodeListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<promo_code::Model>>>, ServiceError> {
    let defaults = PaginationParams::default();
    let pagination = PaginationParams {
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    };
    let (items, total) = state
        .services
        .promo_codes
        .list(&pagination, query.active_only)
        .await?;
    Ok(success_response(pagination.into_response(items, total)))
}

#[utoipa::path(
    post,
    path = "/api/promo-codes",
    request_body = CreatePromoCodeRequest,
    responses(
        (status = 201, description = "Promo code created", body = ApiResponse<promo_code::Model>),
        (status = 400, description = "Invalid terms", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing admin key", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Promo Codes"
)]
pub async fn create_promo_code(
    State(state): State<AppState>,
    Json(request): Json<CreatePromoCodeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<promo_code::Model>>), ServiceError> {
    let promo = state.services.promo_codes.create(request).await?;
    Ok(created_response(promo))
}

#[utoipa::path(
    get,
    path = "/api/promo-codes/{id}",
    params(("id" = Uuid, Path, description = "Promo code id")),
    responses(
        (status = 200, description = "Promo code retrieved", body = ApiResponse<promo_code::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Promo Codes"
)]
pub async fn get_promo_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<promo_code::Model>>, ServiceError> {
    let promo = state.services.promo_codes.get(id).await?;
    Ok(success_response(promo))
}

#[utoipa::path(
    put,
    path = "/api/promo-codes/{id}",
    params(("id" = Uuid, Path, description = "Promo code id")),
    request_body = UpdatePromoCodeRequest,
    responses(
        (status = 200, description = "Promo code updated", body = ApiResponse<promo_code::Model>),
        (status = 400, description = "Invalid terms", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Promo Codes"
)]
pub async fn update_promo_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePromoCodeRequest>,
) -> Result<Json<ApiResponse<promo_code::Model>>, ServiceError> {
    let promo = state.services.promo_codes.update(id, request).await?;
    Ok(success_response(promo))
}

#[utoipa::path(
    delete,
    path = "/api/promo-codes/{id}",
    params(("id" = Uuid, Path, description = "Promo code id")),
    responses(
        (status = 200, description = "Promo code deactivated", body = ApiResponse<promo_code::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Promo Codes"
)]
pub async fn deactivate_promo_code(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<promo_code::Model>>, ServiceError> {
    let promo = state.services.promo_codes.deactivate(id).await?;
    Ok(success_response(promo))
}

#[utoipa::path(
    get,
    path = "/api/promo-codes/{id}/usages",
    params(("id" = Uuid, Path, description = "Promo code id")),
    responses(
        (status = 200, description = "Redemption ledger", body = ApiResponse<Vec<promo_code_usage::Model>>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("AdminKey" = [])),
    tag = "Promo Codes"
)]
pub async fn list_usages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<promo_code_usage::Model>>>, ServiceError> {
    let usages = state.services.promo_codes.usages(id).await?;
    Ok(success_response(usages))
}

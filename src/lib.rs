//! Household Planet Kenya API Library
//!
//! Checkout backend: delivery pricing, promo codes, order totals and payment
//! reconciliation across M-Pesa, Stripe, Flutterwave and manual providers.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Builds every service from configuration around an existing pool
    pub fn new(
        db: Arc<db::DbPool>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Result<Self, errors::ServiceError> {
        let services =
            handlers::AppServices::new(db.clone(), &config, Some(event_sender.clone()))?;
        Ok(Self {
            db,
            config,
            event_sender,
            services,
        })
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Every `/api` route; admin mutations sit behind the `x-admin-key` gate
pub fn api_routes(state: AppState) -> Router<AppState> {
    use handlers::{delivery, orders, payment_webhooks, payments, products, promo_codes};

    let storefront = Router::new()
        // Delivery
        .route("/delivery/locations", get(delivery::list_locations))
        .route("/delivery/locations/:id", get(delivery::get_location))
        .route("/delivery/quote", post(delivery::quote))
        // Promo codes
        .route("/promo-codes/validate", post(promo_codes::validate_promo_code))
        // Catalogue
        .route("/products", get(products::list_products))
        // Orders
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        // Payments
        .route("/payments/initiate", post(payments::initiate_payment))
        .route("/payments/providers", get(payments::list_providers))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/order/:order_id", get(payments::list_order_payments))
        // Provider callbacks
        .route("/payments/mpesa/callback", post(payment_webhooks::mpesa_callback))
        .route("/payments/stripe/webhook", post(payment_webhooks::stripe_webhook))
        .route(
            "/payments/flutterwave/webhook",
            post(payment_webhooks::flutterwave_webhook),
        );

    let admin = Router::new()
        .route("/delivery/locations", post(delivery::create_location))
        .route(
            "/delivery/locations/:id",
            put(delivery::update_location).delete(delivery::delete_location),
        )
        .route(
            "/promo-codes",
            get(promo_codes::list_promo_codes).post(promo_codes::create_promo_code),
        )
        .route(
            "/promo-codes/:id",
            get(promo_codes::get_promo_code)
                .put(promo_codes::update_promo_code)
                .delete(promo_codes::deactivate_promo_code),
        )
        .route("/promo-codes/:id/usages", get(promo_codes::list_usages))
        .route("/products", post(products::create_product))
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/payments/:id/confirm", post(payments::confirm_payment))
        .route_layer(from_fn_with_state(
            state,
            middleware_helpers::admin_key_middleware,
        ));

    storefront.merge(admin)
}

/// Application router without transport concerns (CORS, compression)
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "household-planet-api up" }))
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .nest("/api", api_routes(state.clone()))
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "household-planet-api",
        "environment": state.config.environment,
        "currency": state.config.currency,
        "free_shipping_threshold": state.config.free_shipping_threshold,
        "payment_providers": state.services.payments.available_providers(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "database health check failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware_helpers::ADMIN_KEY_HEADER;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Household Planet Kenya API",
        version = "1.0.0",
        description = r#"
# Household Planet Kenya Commerce API

Checkout backend for the Household Planet Kenya storefront.

## Features

- **Delivery**: Location-based shipping prices with free shipping above a configurable subtotal
- **Promo Codes**: Percentage and fixed discounts with global and per-customer usage limits
- **Orders**: Server-side total composition (`subtotal - discount + shipping`) with stock reservation
- **Payments**: M-Pesa STK push, Stripe, Flutterwave, bank transfer and cash on delivery

## Administration

Mutating catalogue, promo and delivery endpoints require the `x-admin-key` header
when an admin key is configured.

## Error Handling

Errors share one response format:

```json
{
  "error": "Bad Request",
  "message": "Promo code SAVE10 has expired",
  "details": "expired",
  "request_id": "5c1e...",
  "timestamp": "2025-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `per_page` (default 20, max 100).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Delivery", description = "Delivery locations and shipping quotes"),
        (name = "Promo Codes", description = "Promo code validation and administration"),
        (name = "Products", description = "Product catalogue"),
        (name = "Orders", description = "Order management endpoints"),
        (name = "Payments", description = "Payment processing endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Delivery
        crate::handlers::delivery::list_locations,
        crate::handlers::delivery::get_location,
        crate::handlers::delivery::quote,
        crate::handlers::delivery::create_location,
        crate::handlers::delivery::update_location,
        crate::handlers::delivery::delete_location,

        // Promo codes
        crate::handlers::promo_codes::validate_promo_code,
        crate::handlers::promo_codes::list_promo_codes,
        crate::handlers::promo_codes::create_promo_code,
        crate::handlers::promo_codes::get_promo_code,
        crate::handlers::promo_codes::update_promo_code,
        crate::handlers::promo_codes::deactivate_promo_code,
        crate::handlers::promo_codes::list_usages,

        // Products
        crate::handlers::products::list_products,
        crate::handlers::products::create_product,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order_status,

        // Payments
        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::list_providers,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::list_order_payments,
        crate::handlers::payments::confirm_payment,

        // Webhooks
        crate::handlers::payment_webhooks::mpesa_callback,
        crate::handlers::payment_webhooks::stripe_webhook,
        crate::handlers::payment_webhooks::flutterwave_webhook,
    ),
    components(
        schemas(
            // Delivery types
            crate::services::delivery::DeliveryLocation,
            crate::services::delivery::DeliveryQuote,
            crate::services::delivery::DeliveryQuoteRequest,
            crate::services::delivery::CreateDeliveryLocationRequest,
            crate::services::delivery::UpdateDeliveryLocationRequest,

            // Promo types
            crate::entities::promo_code::DiscountType,
            crate::services::promo_codes::ValidatePromoCodeRequest,
            crate::services::promo_codes::ValidatePromoCodeResponse,
            crate::services::promo_codes::CreatePromoCodeRequest,
            crate::services::promo_codes::UpdatePromoCodeRequest,

            // Order types
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemRequest,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::pricing::OrderTotals,

            // Payment types
            crate::entities::payment_transaction::ProviderKind,
            crate::entities::payment_transaction::TransactionStatus,
            crate::services::payments::InitiatePaymentRequest,
            crate::services::payments::ConfirmPaymentRequest,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "AdminKey",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(ADMIN_KEY_HEADER))),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_checkout_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Household Planet Kenya API"));
        assert!(json.contains("/api/orders"));
        assert!(json.contains("/api/promo-codes/validate"));
        assert!(json.contains("/api/payments/mpesa/callback"));
        assert!(json.contains("AdminKey"));
    }
}

use crate::{errors::ServiceError, AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Header carrying the shared back-office secret
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Rejects admin mutations unless the configured key is presented.
///
/// When `admin_api_key` is unset the gate is open, which is how local
/// development and the integration tests run.
pub async fn admin_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(key)
            if crate::handlers::payment_webhooks::constant_time_eq(
                key.as_bytes(),
                expected.as_bytes(),
            ) =>
        {
            next.run(request).await
        }
        Some(_) => {
            tracing::warn!(uri = %request.uri(), "admin request with wrong key");
            ServiceError::Unauthorized("invalid admin key".to_string()).into_response()
        }
        None => ServiceError::Unauthorized(format!("missing {} header", ADMIN_KEY_HEADER))
            .into_response(),
    }
}

//! Safaricom Daraja STK push (Lipa na M-Pesa Online).

use super::{decimal_from_json, PaymentContext, PaymentProvider, ProviderInitiation, ProviderOutcome};
use crate::{config::MpesaConfig, entities::payment_transaction::ProviderKind, errors::ServiceError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Daraja timestamps are East Africa Time
const EAT_OFFSET_SECS: i32 = 3 * 3600;

pub struct MpesaProvider {
    client: reqwest::Client,
    config: MpesaConfig,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// `YYYYMMDDHHMMSS` in East Africa Time
pub fn timestamp(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(EAT_OFFSET_SECS) {
        Some(eat) => now.with_timezone(&eat).format("%Y%m%d%H%M%S").to_string(),
        None => now.format("%Y%m%d%H%M%S").to_string(),
    }
}

/// STK password: base64(shortcode + passkey + timestamp)
pub fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// M-Pesa only accepts whole shillings
pub fn whole_shillings(amount: Decimal) -> i64 {
    amount.ceil().to_i64().unwrap_or(0)
}

impl MpesaProvider {
    pub fn new(client: reqwest::Client, config: MpesaConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let response = self
            .client
            .get(self.url("/oauth/v1/generate"))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "M-Pesa authentication failed with status {}",
                response.status()
            )));
        }
        let token: AccessTokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentProvider for MpesaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mpesa
    }

    #[instrument(skip(self, ctx), fields(order_number = %ctx.order.order_number))]
    async fn initiate(&self, ctx: &PaymentContext<'_>) -> Result<ProviderInitiation, ServiceError> {
        let phone = ctx
            .phone_number
            .ok_or_else(|| ServiceError::ValidationError("M-Pesa requires a phone number".into()))?;
        let token = self.access_token().await?;
        let ts = timestamp(Utc::now());

        let body = json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password(&self.config.shortcode, &self.config.passkey, &ts),
            "Timestamp": ts,
            "TransactionType": self.config.transaction_type,
            "Amount": whole_shillings(ctx.amount),
            "PartyA": phone,
            "PartyB": self.config.shortcode,
            "PhoneNumber": phone,
            "CallBackURL": self.config.callback_url,
            "AccountReference": ctx.order.order_number,
            "TransactionDesc": format!("Payment for order {}", ctx.order.order_number),
        });

        let response = self
            .client
            .post(self.url("/mpesa/stkpush/v1/processrequest"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let parsed: StkPushResponse = response.json().await?;
        debug!(?parsed, "STK push response");

        match (parsed.response_code.as_deref(), parsed.checkout_request_id) {
            (Some("0"), Some(checkout_request_id)) if status.is_success() => Ok(ProviderInitiation {
                provider_reference: checkout_request_id,
                instructions: Some(parsed.customer_message.unwrap_or_else(|| {
                    "Check your phone and enter your M-Pesa PIN to complete payment".to_string()
                })),
                checkout_url: None,
                client_secret: None,
            }),
            _ => Err(ServiceError::ExternalServiceError(format!(
                "M-Pesa STK push rejected: {}",
                parsed
                    .error_message
                    .or(parsed.response_description)
                    .unwrap_or_else(|| status.to_string())
            ))),
        }
    }

    fn reconcile(&self, payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
        parse_stk_callback(payload).map(Some)
    }
}

/// Reads `Body.stkCallback` from a Daraja result notification
pub fn parse_stk_callback(payload: &Value) -> Result<ProviderOutcome, ServiceError> {
    let callback = payload
        .pointer("/Body/stkCallback")
        .ok_or_else(|| ServiceError::BadRequest("missing Body.stkCallback".into()))?;
    let reference = callback
        .get("CheckoutRequestID")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest("missing CheckoutRequestID".into()))?;
    let result_code = callback
        .get("ResultCode")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| ServiceError::BadRequest("missing ResultCode".into()))?;

    if result_code != 0 {
        let reason = callback
            .get("ResultDesc")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(ProviderOutcome::failed(reference, reason));
    }

    let mut outcome = ProviderOutcome::completed(reference);
    if let Some(items) = callback
        .pointer("/CallbackMetadata/Item")
        .and_then(Value::as_array)
    {
        for item in items {
            let value = item.get("Value");
            match item.get("Name").and_then(Value::as_str) {
                Some("Amount") => outcome.amount = value.and_then(decimal_from_json),
                Some("MpesaReceiptNumber") => {
                    outcome.external_id = value.and_then(Value::as_str).map(str::to_string)
                }
                _ => {}
            }
        }
    }
    Ok(outcome)
}

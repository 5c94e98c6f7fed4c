//! Stripe PaymentIntents for card payments.

use super::{PaymentContext, PaymentProvider, ProviderInitiation, ProviderOutcome};
use crate::{config::StripeConfig, entities::payment_transaction::ProviderKind, errors::ServiceError};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

pub struct StripeProvider {
    client: reqwest::Client,
    config: StripeConfig,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: Option<String>,
}

/// Cents for two-decimal currencies such as KES
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

impl StripeProvider {
    pub fn new(client: reqwest::Client, config: StripeConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    #[instrument(skip(self, ctx), fields(order_number = %ctx.order.order_number))]
    async fn initiate(&self, ctx: &PaymentContext<'_>) -> Result<ProviderInitiation, ServiceError> {
        let transaction_id = ctx.transaction_id.to_string();
        let order_id = ctx.order.id.to_string();
        let amount = to_minor_units(ctx.amount).to_string();
        let currency = ctx.currency.to_lowercase();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[order_id]", order_id.as_str()),
            ("metadata[order_number]", ctx.order.order_number.as_str()),
            ("metadata[transaction_id]", transaction_id.as_str()),
        ];

        let response = self
            .client
            .post(format!(
                "{}/v1/payment_intents",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", transaction_id.as_str())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| status.to_string());
            return Err(ServiceError::ExternalServiceError(format!(
                "Stripe rejected payment intent: {}",
                message
            )));
        }

        let intent: PaymentIntentResponse = response.json().await?;
        debug!(intent_id = %intent.id, "payment intent created");
        Ok(ProviderInitiation {
            provider_reference: intent.id,
            instructions: Some("Complete card payment in the checkout form".to_string()),
            checkout_url: None,
            client_secret: intent.client_secret,
        })
    }

    fn reconcile(&self, payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
        parse_event(payload)
    }
}

/// Maps PaymentIntent webhook events onto outcomes
pub fn parse_event(payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest("missing event type".into()))?;
    let object = payload.pointer("/data/object");
    let intent_id = || {
        object
            .and_then(|o| o.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::BadRequest("missing payment intent id".into()))
    };

    match event_type {
        "payment_intent.succeeded" => {
            let mut outcome = ProviderOutcome::completed(intent_id()?);
            outcome.amount = object
                .and_then(|o| o.get("amount_received"))
                .and_then(Value::as_i64)
                .map(from_minor_units);
            outcome.external_id = object
                .and_then(|o| o.get("latest_charge"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(Some(outcome))
        }
        "payment_intent.payment_failed" => {
            let reason = object
                .and_then(|o| o.pointer("/last_payment_error/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some("Card payment failed".to_string()));
            Ok(Some(ProviderOutcome::failed(intent_id()?, reason)))
        }
        "payment_intent.canceled" => Ok(Some(ProviderOutcome::failed(
            intent_id()?,
            Some("Payment intent canceled".to_string()),
        ))),
        _ => Ok(None),
    }
}

/// Verifies a `Stripe-Signature` header of the form `t=...,v1=...`.
///
/// Any `v1` entry matching HMAC-SHA256 over `"{t}.{body}"` is accepted, provided
/// `t` lies within `tolerance_secs` of `now`.
pub fn verify_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> bool {
    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let Some(ts) = timestamp else { return false };
    let Ok(ts_num) = ts.parse::<i64>() else { return false };
    if (now - ts_num).abs() > tolerance_secs {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    signatures
        .iter()
        .any(|sig| crate::handlers::payment_webhooks::constant_time_eq(sig.as_bytes(), expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::OutcomeStatus;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sign(secret: &str, ts: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", ts).as_bytes());
        mac.update(body);
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(1450)), 145_000);
        assert_eq!(to_minor_units(dec!(99.995)), 10_000);
        assert_eq!(from_minor_units(145_050), dec!(1450.50));
    }

    #[test]
    fn valid_signature_within_tolerance() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_test", 1_700_000_000, body);
        assert!(verify_signature(&header, body, "whsec_test", 300, 1_700_000_100));
    }

    #[test]
    fn tampered_body_or_wrong_secret_fails() {
        let body = br#"{"amount":100}"#;
        let header = sign("whsec_test", 1_700_000_000, body);
        assert!(!verify_signature(&header, br#"{"amount":999}"#, "whsec_test", 300, 1_700_000_000));
        assert!(!verify_signature(&header, body, "whsec_other", 300, 1_700_000_000));
    }

    #[test]
    fn stale_timestamp_fails() {
        let body = b"{}";
        let header = sign("whsec_test", 1_700_000_000, body);
        assert!(!verify_signature(&header, body, "whsec_test", 300, 1_700_000_301));
    }

    #[test]
    fn malformed_header_fails() {
        assert!(!verify_signature("v1=abc", b"{}", "s", 300, 0));
        assert!(!verify_signature("t=notanumber,v1=abc", b"{}", "s", 300, 0));
    }

    #[test]
    fn succeeded_event_maps_to_completed() {
        let outcome = parse_event(&json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_123", "amount_received": 145000, "latest_charge": "ch_9"}}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(outcome.reference, "pi_123");
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.amount, Some(dec!(1450)));
        assert_eq!(outcome.external_id.as_deref(), Some("ch_9"));
    }

    #[test]
    fn failed_event_carries_error_message() {
        let outcome = parse_event(&json!({
            "type": "payment_intent.payment_failed",
            "data": {"object": {"id": "pi_1", "last_payment_error": {"message": "Your card was declined."}}}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("Your card was declined."));
    }

    #[test]
    fn unrelated_events_are_ignored() {
        assert_eq!(
            parse_event(&json!({"type": "customer.created", "data": {"object": {}}})).unwrap(),
            None
        );
    }
}

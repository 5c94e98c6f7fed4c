//! Flutterwave Standard hosted checkout.

use super::{
    decimal_from_json, transaction_reference, PaymentContext, PaymentProvider, ProviderInitiation,
    ProviderOutcome,
};
use crate::{
    config::FlutterwaveConfig, entities::payment_transaction::ProviderKind, errors::ServiceError,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

pub struct FlutterwaveProvider {
    client: reqwest::Client,
    config: FlutterwaveConfig,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkResponse {
    status: String,
    message: Option<String>,
    data: Option<PaymentLinkData>,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkData {
    link: String,
}

impl FlutterwaveProvider {
    pub fn new(client: reqwest::Client, config: FlutterwaveConfig) -> Self {
        Self { client, config }
    }

    pub fn secret_hash(&self) -> Option<&str> {
        self.config.secret_hash.as_deref()
    }
}

/// Our reference for a transaction, echoed back as `tx_ref`
pub fn tx_ref(order_number: &str, transaction_id: &uuid::Uuid) -> String {
    transaction_reference(order_number, transaction_id)
}

#[async_trait]
impl PaymentProvider for FlutterwaveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Flutterwave
    }

    #[instrument(skip(self, ctx), fields(order_number = %ctx.order.order_number))]
    async fn initiate(&self, ctx: &PaymentContext<'_>) -> Result<ProviderInitiation, ServiceError> {
        let reference = tx_ref(&ctx.order.order_number, &ctx.transaction_id);
        let body = json!({
            "tx_ref": reference,
            "amount": ctx.amount.to_string(),
            "currency": ctx.currency,
            "redirect_url": self.config.redirect_url,
            "customer": {
                "email": ctx.order.customer_email,
                "phonenumber": ctx.order.customer_phone,
                "name": ctx.order.customer_name,
            },
            "customizations": {
                "title": "Household Planet Kenya",
                "description": format!("Order {}", ctx.order.order_number),
            },
            "meta": {
                "order_id": ctx.order.id,
                "transaction_id": ctx.transaction_id,
            }
        });

        let response = self
            .client
            .post(format!(
                "{}/v3/payments",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await?;
        let http_status = response.status();
        let parsed: PaymentLinkResponse = response.json().await?;

        match parsed.data {
            Some(data) if http_status.is_success() && parsed.status == "success" => {
                Ok(ProviderInitiation {
                    provider_reference: reference,
                    instructions: Some("Complete payment on the Flutterwave checkout page".into()),
                    checkout_url: Some(data.link),
                    client_secret: None,
                })
            }
            _ => Err(ServiceError::ExternalServiceError(format!(
                "Flutterwave rejected payment: {}",
                parsed.message.unwrap_or_else(|| http_status.to_string())
            ))),
        }
    }

    fn reconcile(&self, payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
        parse_webhook(payload)
    }
}

/// Reads a `charge.completed` webhook
pub fn parse_webhook(payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
    let event = payload.get("event").and_then(Value::as_str).unwrap_or("");
    if event != "charge.completed" {
        return Ok(None);
    }
    let data = payload
        .get("data")
        .ok_or_else(|| ServiceError::BadRequest("missing data".into()))?;
    let reference = data
        .get("tx_ref")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::BadRequest("missing tx_ref".into()))?;
    let external_id = data.get("id").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    let outcome = match data.get("status").and_then(Value::as_str) {
        Some("successful") => ProviderOutcome {
            amount: data.get("amount").and_then(decimal_from_json),
            external_id,
            ..ProviderOutcome::completed(reference)
        },
        Some(status) => ProviderOutcome {
            external_id,
            ..ProviderOutcome::failed(
                reference,
                data.get("processor_response")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| Some(format!("Charge {}", status))),
            )
        },
        None => return Err(ServiceError::BadRequest("missing charge status".into())),
    };
    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::OutcomeStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn tx_ref_is_order_number_plus_short_id() {
        let id = uuid::Uuid::parse_str("6f1c2b3a-0000-4000-8000-000000000000").unwrap();
        assert_eq!(tx_ref("HP-20250101-ABC123", &id), "HP-20250101-ABC123-6f1c2b3a");
    }

    #[test]
    fn successful_charge_is_completed() {
        let outcome = parse_webhook(&json!({
            "event": "charge.completed",
            "data": {"id": 285959875, "tx_ref": "HP-1-abc", "status": "successful", "amount": 1450}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.amount, Some(dec!(1450)));
        assert_eq!(outcome.external_id.as_deref(), Some("285959875"));
    }

    #[test]
    fn failed_charge_is_failure() {
        let outcome = parse_webhook(&json!({
            "event": "charge.completed",
            "data": {"id": 1, "tx_ref": "HP-1-abc", "status": "failed", "processor_response": "Insufficient funds"}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("Insufficient funds"));
    }

    #[test]
    fn other_events_are_ignored() {
        assert_eq!(parse_webhook(&json!({"event": "transfer.completed"})).unwrap(), None);
    }
}

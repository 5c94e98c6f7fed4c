use super::{
    reconcile_manual, transaction_reference, PaymentContext, PaymentProvider, ProviderInitiation,
    ProviderOutcome,
};
use crate::{entities::payment_transaction::ProviderKind, errors::ServiceError};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Cash collected by the rider, confirmed by an administrator
pub struct CashOnDeliveryProvider;

pub fn reference(order_number: &str, transaction_id: &Uuid) -> String {
    format!("COD-{}", transaction_reference(order_number, transaction_id))
}

#[async_trait]
impl PaymentProvider for CashOnDeliveryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::CashOnDelivery
    }

    async fn initiate(&self, ctx: &PaymentContext<'_>) -> Result<ProviderInitiation, ServiceError> {
        Ok(ProviderInitiation {
            provider_reference: reference(&ctx.order.order_number, &ctx.transaction_id),
            instructions: Some(format!(
                "Pay {} {} in cash when order {} is delivered to {}",
                ctx.currency, ctx.amount, ctx.order.order_number, ctx.order.delivery_location_name
            )),
            checkout_url: None,
            client_secret: None,
        })
    }

    fn reconcile(&self, payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
        reconcile_manual(payload)
    }
}

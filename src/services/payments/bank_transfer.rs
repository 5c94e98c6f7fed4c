use super::{
    reconcile_manual, transaction_reference, PaymentContext, PaymentProvider, ProviderInitiation,
    ProviderOutcome,
};
use crate::{
    config::BankTransferConfig, entities::payment_transaction::ProviderKind, errors::ServiceError,
};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Direct bank deposit, settled by an administrator
pub struct BankTransferProvider {
    account: Option<BankTransferConfig>,
}

impl BankTransferProvider {
    pub fn new(account: Option<BankTransferConfig>) -> Self {
        Self { account }
    }
}

pub fn reference(order_number: &str, transaction_id: &Uuid) -> String {
    format!("BT-{}", transaction_reference(order_number, transaction_id))
}

#[async_trait]
impl PaymentProvider for BankTransferProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BankTransfer
    }

    async fn initiate(&self, ctx: &PaymentContext<'_>) -> Result<ProviderInitiation, ServiceError> {
        let reference = reference(&ctx.order.order_number, &ctx.transaction_id);
        let instructions = match &self.account {
            Some(account) => format!(
                "Transfer {} {} to {} ({}), account {}{}. Use {} as the payment reference.",
                ctx.currency,
                ctx.amount,
                account.bank_name,
                account.account_name,
                account.account_number,
                account
                    .branch
                    .as_deref()
                    .map(|b| format!(", {} branch", b))
                    .unwrap_or_default(),
                reference
            ),
            None => format!(
                "Transfer {} {} to our bank account. Use {} as the payment reference.",
                ctx.currency, ctx.amount, reference
            ),
        };
        Ok(ProviderInitiation {
            provider_reference: reference,
            instructions: Some(instructions),
            checkout_url: None,
            client_secret: None,
        })
    }

    fn reconcile(&self, payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
        reconcile_manual(payload)
    }
}

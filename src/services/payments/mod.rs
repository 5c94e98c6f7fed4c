//! Payment initiation and reconciliation across providers.
//!
//! Every provider implements [`PaymentProvider`]; the service owns the shared
//! `PENDING -> COMPLETED | FAILED` state machine and the order bookkeeping.

pub mod bank_transfer;
pub mod cash_on_delivery;
pub mod flutterwave;
pub mod mpesa;
pub mod stripe;

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    entities::payment_transaction::{
        self, Entity as PaymentTransactionEntity, Model as PaymentTransactionModel, ProviderKind,
        TransactionStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::phone::normalize_kenyan_phone,
};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// What a provider needs to start collecting money for an order
#[derive(Debug, Clone)]
pub struct PaymentContext<'a> {
    pub transaction_id: Uuid,
    pub order: &'a OrderModel,
    /// Outstanding amount being requested
    pub amount: Decimal,
    pub currency: &'a str,
    /// Normalised `2547XXXXXXXX` number, when one applies
    pub phone_number: Option<&'a str>,
}

/// Provider response to an initiation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProviderInitiation {
    /// Handle later callbacks are matched on
    pub provider_reference: String,
    pub instructions: Option<String>,
    /// Hosted payment page, for redirect-based providers
    pub checkout_url: Option<String>,
    /// Client-side confirmation secret (Stripe)
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Provider-neutral result of a callback
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutcome {
    pub reference: String,
    pub status: OutcomeStatus,
    /// Amount the provider reports as collected
    pub amount: Option<Decimal>,
    pub external_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl ProviderOutcome {
    pub fn completed(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            status: OutcomeStatus::Completed,
            amount: None,
            external_id: None,
            failure_reason: None,
        }
    }

    pub fn failed(reference: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            reference: reference.into(),
            status: OutcomeStatus::Failed,
            amount: None,
            external_id: None,
            failure_reason: reason,
        }
    }
}

/// One payment channel
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Starts collection; errors mark the transaction FAILED
    async fn initiate(&self, ctx: &PaymentContext<'_>) -> Result<ProviderInitiation, ServiceError>;

    /// Translates a callback payload; `Ok(None)` for events that carry no outcome
    fn reconcile(&self, payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError>;
}

/// Parses a JSON number or numeric string into a `Decimal`
pub(crate) fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Order number plus the first eight hex digits of the transaction id.
///
/// Every attempt on an order gets its own reference, so callbacks always land
/// on the transaction they belong to.
pub fn transaction_reference(order_number: &str, transaction_id: &Uuid) -> String {
    format!("{}-{}", order_number, &transaction_id.simple().to_string()[..8])
}

/// Manual confirmation payload shared by bank transfer and cash on delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ManualConfirmation {
    pub reference: String,
    pub status: OutcomeStatus,
    pub amount: Option<Decimal>,
    pub external_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

pub(crate) fn reconcile_manual(payload: &Value) -> Result<Option<ProviderOutcome>, ServiceError> {
    let confirmation: ManualConfirmation = serde_json::from_value(payload.clone())
        .map_err(|e| ServiceError::BadRequest(format!("invalid confirmation: {}", e)))?;
    Ok(Some(ProviderOutcome {
        reference: confirmation.reference,
        status: confirmation.status,
        amount: confirmation.amount,
        external_id: confirmation.external_transaction_id,
        failure_reason: confirmation.failure_reason,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub provider: ProviderKind,
    /// Overrides the order's phone for M-Pesa
    #[validate(length(min = 9, max = 20))]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitiatePaymentResponse {
    pub transaction: PaymentTransactionModel,
    pub instructions: Option<String>,
    pub checkout_url: Option<String>,
    pub client_secret: Option<String>,
}

/// Back-office settlement of a manual payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ConfirmPaymentRequest {
    #[serde(default = "default_success")]
    pub success: bool,
    /// Amount actually received, defaults to the requested amount
    pub amount: Option<Decimal>,
    #[validate(length(max = 128))]
    pub external_transaction_id: Option<String>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Order payment status after `paid` of `total` has been collected
pub fn payment_status_for(paid: Decimal, total: Decimal) -> PaymentStatus {
    if paid >= total {
        PaymentStatus::Paid
    } else if paid > Decimal::ZERO {
        PaymentStatus::PartiallyPaid
    } else {
        PaymentStatus::Pending
    }
}

/// Registry of configured providers plus the reconciliation state machine
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
    event_sender: Option<EventSender>,
    currency: String,
}

impl PaymentService {
    /// Service with only the always-available manual providers
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<EventSender>, currency: String) -> Self {
        let service = Self {
            db_pool,
            providers: HashMap::new(),
            event_sender,
            currency,
        };
        service
            .with_provider(Arc::new(cash_on_delivery::CashOnDeliveryProvider))
            .with_provider(Arc::new(bank_transfer::BankTransferProvider::new(None)))
    }

    /// Registers every provider that has configuration
    pub fn from_config(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Option<EventSender>,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.payment_request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let mut service = Self::new(db_pool, event_sender, config.currency.clone()).with_provider(
            Arc::new(bank_transfer::BankTransferProvider::new(
                config.bank_transfer.clone(),
            )),
        );
        if let Some(mpesa) = &config.mpesa {
            service = service.with_provider(Arc::new(mpesa::MpesaProvider::new(
                client.clone(),
                mpesa.clone(),
            )));
        }
        if let Some(stripe) = &config.stripe {
            service = service.with_provider(Arc::new(stripe::StripeProvider::new(
                client.clone(),
                stripe.clone(),
            )));
        }
        if let Some(flutterwave) = &config.flutterwave {
            service = service.with_provider(Arc::new(flutterwave::FlutterwaveProvider::new(
                client,
                flutterwave.clone(),
            )));
        }

        info!(providers = ?service.available_providers(), "payment providers registered");
        Ok(service)
    }

    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn available_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn PaymentProvider>, ServiceError> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            ServiceError::ValidationError(format!("payment provider {} is not configured", kind))
        })
    }

    /// Opens a PENDING transaction for the order's outstanding amount and hands
    /// it to the provider.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, provider = %request.provider))]
    pub async fn initiate(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        request.validate()?;
        let provider = self.provider(request.provider)?;
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(request.order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", request.order_id)))?;

        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is cancelled",
                order.order_number
            )));
        }
        let amount = order.outstanding_amount();
        if order.payment_status == PaymentStatus::Paid || amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is already paid",
                order.order_number
            )));
        }

        let phone_number = if request.provider == ProviderKind::Mpesa {
            let raw = request
                .phone_number
                .as_deref()
                .unwrap_or(&order.customer_phone);
            Some(normalize_kenyan_phone(raw).ok_or_else(|| {
                ServiceError::ValidationError(format!("{} is not a Kenyan mobile number", raw))
            })?)
        } else {
            None
        };

        let now = Utc::now();
        let pending = payment_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            provider: Set(request.provider),
            amount: Set(amount),
            currency: Set(order.currency.clone()),
            status: Set(TransactionStatus::Pending),
            provider_reference: Set(None),
            external_transaction_id: Set(None),
            phone_number: Set(phone_number.clone()),
            failure_reason: Set(None),
            raw_callback: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        }
        .insert(db)
        .await?;

        let ctx = PaymentContext {
            transaction_id: pending.id,
            order: &order,
            amount,
            currency: &order.currency,
            phone_number: phone_number.as_deref(),
        };

        let initiation = match provider.initiate(&ctx).await {
            Ok(initiation) => initiation,
            Err(e) => {
                error!(transaction_id = %pending.id, error = %e, "provider rejected payment initiation");
                counter!("household_planet.payments.initiation_failed", 1);
                let reason = e.to_string();
                let mut failed: payment_transaction::ActiveModel = pending.clone().into();
                failed.status = Set(TransactionStatus::Failed);
                failed.failure_reason = Set(Some(reason.clone()));
                failed.updated_at = Set(Utc::now());
                failed.update(db).await?;
                self.emit(Event::PaymentFailed {
                    transaction_id: pending.id,
                    order_id: order.id,
                    provider: request.provider,
                    reason: Some(reason.clone()),
                })
                .await;
                return Err(ServiceError::PaymentFailed(reason));
            }
        };

        let mut active: payment_transaction::ActiveModel = pending.into();
        active.provider_reference = Set(Some(initiation.provider_reference.clone()));
        active.updated_at = Set(Utc::now());
        let transaction = active.update(db).await?;

        let mut order_active: order::ActiveModel = order.into();
        order_active.payment_method = Set(Some(request.provider.to_string()));
        order_active.updated_at = Set(Utc::now());
        order_active.update(db).await?;

        counter!("household_planet.payments.initiated", 1);
        info!(
            transaction_id = %transaction.id,
            reference = %initiation.provider_reference,
            %amount,
            "payment initiated"
        );
        self.emit(Event::PaymentInitiated {
            transaction_id: transaction.id,
            order_id: transaction.order_id,
            provider: transaction.provider,
            amount,
        })
        .await;

        Ok(InitiatePaymentResponse {
            transaction,
            instructions: initiation.instructions,
            checkout_url: initiation.checkout_url,
            client_secret: initiation.client_secret,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<PaymentTransactionModel, ServiceError> {
        PaymentTransactionEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", id)))
    }

    pub async fn list_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<PaymentTransactionModel>, ServiceError> {
        Ok(PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::OrderId.eq(order_id))
            .order_by_desc(payment_transaction::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    /// Runs a provider callback through reconcile and applies the outcome
    #[instrument(skip(self, payload))]
    pub async fn handle_callback(
        &self,
        kind: ProviderKind,
        payload: &Value,
    ) -> Result<Option<PaymentTransactionModel>, ServiceError> {
        let provider = self.provider(kind)?;
        match provider.reconcile(payload)? {
            Some(outcome) => {
                let raw = serde_json::to_string(payload)?;
                self.apply_outcome(kind, outcome, Some(raw)).await.map(Some)
            }
            None => {
                debug!(%kind, "callback carried no payment outcome");
                Ok(None)
            }
        }
    }

    /// Admin settlement for bank transfer and cash on delivery
    #[instrument(skip(self, request))]
    pub async fn confirm_manual(
        &self,
        transaction_id: Uuid,
        request: ConfirmPaymentRequest,
    ) -> Result<PaymentTransactionModel, ServiceError> {
        request.validate()?;
        let transaction = self.get(transaction_id).await?;
        if !transaction.provider.is_manual() {
            return Err(ServiceError::InvalidOperation(format!(
                "{} payments are settled by provider callbacks",
                transaction.provider
            )));
        }
        let reference = transaction.provider_reference.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Payment {} was never initiated with the provider",
                transaction_id
            ))
        })?;
        if let Some(amount) = request.amount {
            if amount <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "amount must be positive".to_string(),
                ));
            }
        }

        let payload = serde_json::to_value(ManualConfirmation {
            reference,
            status: if request.success {
                OutcomeStatus::Completed
            } else {
                OutcomeStatus::Failed
            },
            amount: request.amount,
            external_transaction_id: request.external_transaction_id,
            failure_reason: request.reason,
        })?;

        self.handle_callback(transaction.provider, &payload)
            .await?
            .ok_or_else(|| ServiceError::InternalError("manual confirmation produced no outcome".into()))
    }

    /// Moves a PENDING transaction to its terminal state and updates the order.
    ///
    /// Duplicate deliveries of the same outcome return the stored transaction
    /// unchanged.
    #[instrument(skip(self, outcome, raw_callback), fields(reference = %outcome.reference, status = ?outcome.status))]
    pub async fn apply_outcome(
        &self,
        kind: ProviderKind,
        outcome: ProviderOutcome,
        raw_callback: Option<String>,
    ) -> Result<PaymentTransactionModel, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let transaction = PaymentTransactionEntity::find()
            .filter(payment_transaction::Column::Provider.eq(kind))
            .filter(payment_transaction::Column::ProviderReference.eq(outcome.reference.clone()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "{} payment with reference {} not found",
                    kind, outcome.reference
                ))
            })?;

        if transaction.status.is_terminal() {
            debug!(transaction_id = %transaction.id, status = %transaction.status, "duplicate payment callback ignored");
            counter!("household_planet.payments.duplicate_callbacks", 1);
            return Ok(transaction);
        }

        let now = Utc::now();
        let (new_status, amount) = match outcome.status {
            OutcomeStatus::Completed => {
                let amount = outcome.amount.unwrap_or(transaction.amount);
                if amount != transaction.amount {
                    warn!(
                        requested = %transaction.amount,
                        received = %amount,
                        "provider reported a different amount"
                    );
                }
                (TransactionStatus::Completed, amount)
            }
            OutcomeStatus::Failed => (TransactionStatus::Failed, transaction.amount),
        };

        // Only one delivery can win the PENDING row
        let claimed = PaymentTransactionEntity::update_many()
            .col_expr(payment_transaction::Column::Status, Expr::value(new_status))
            .col_expr(payment_transaction::Column::Amount, Expr::value(amount))
            .col_expr(
                payment_transaction::Column::ExternalTransactionId,
                Expr::value(outcome.external_id.clone()),
            )
            .col_expr(
                payment_transaction::Column::FailureReason,
                Expr::value(outcome.failure_reason.clone()),
            )
            .col_expr(payment_transaction::Column::RawCallback, Expr::value(raw_callback))
            .col_expr(payment_transaction::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                payment_transaction::Column::CompletedAt,
                Expr::value(if new_status == TransactionStatus::Completed {
                    Some(now)
                } else {
                    None
                }),
            )
            .filter(payment_transaction::Column::Id.eq(transaction.id))
            .filter(payment_transaction::Column::Status.eq(TransactionStatus::Pending))
            .exec(&txn)
            .await?;

        if claimed.rows_affected == 0 {
            let current = PaymentTransactionEntity::find_by_id(transaction.id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", transaction.id)))?;
            return Ok(current);
        }

        let order = match new_status {
            TransactionStatus::Completed => {
                OrderEntity::update_many()
                    .col_expr(
                        order::Column::PaidAmount,
                        Expr::col(order::Column::PaidAmount).add(amount),
                    )
                    .col_expr(order::Column::PaymentMethod, Expr::value(kind.to_string()))
                    .col_expr(order::Column::UpdatedAt, Expr::value(now))
                    .filter(order::Column::Id.eq(transaction.order_id))
                    .exec(&txn)
                    .await?;

                let order = load_order(&txn, transaction.order_id).await?;
                let mut active: order::ActiveModel = order.clone().into();
                active.payment_status = Set(payment_status_for(order.paid_amount, order.total));
                if order.status == OrderStatus::Pending {
                    active.status = Set(OrderStatus::Confirmed);
                }
                active.update(&txn).await?
            }
            _ => {
                let order = load_order(&txn, transaction.order_id).await?;
                if order.paid_amount <= Decimal::ZERO {
                    let mut active: order::ActiveModel = order.into();
                    active.payment_status = Set(PaymentStatus::Failed);
                    active.updated_at = Set(now);
                    active.update(&txn).await?
                } else {
                    order
                }
            }
        };

        let updated = PaymentTransactionEntity::find_by_id(transaction.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", transaction.id)))?;
        txn.commit().await?;

        info!(
            transaction_id = %updated.id,
            order_number = %order.order_number,
            status = %updated.status,
            paid = %order.paid_amount,
            payment_status = %order.payment_status,
            "payment reconciled"
        );

        match updated.status {
            TransactionStatus::Completed => {
                counter!("household_planet.payments.completed", 1);
                self.emit(Event::PaymentCompleted {
                    transaction_id: updated.id,
                    order_id: updated.order_id,
                    provider: kind,
                    amount,
                })
                .await;
            }
            _ => {
                counter!("household_planet.payments.failed", 1);
                self.emit(Event::PaymentFailed {
                    transaction_id: updated.id,
                    order_id: updated.order_id,
                    provider: kind,
                    reason: updated.failure_reason.clone(),
                })
                .await;
            }
        }

        Ok(updated)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }
}

async fn load_order<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<OrderModel, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

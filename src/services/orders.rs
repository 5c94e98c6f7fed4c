use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
    entities::order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::common::PaginationParams,
    services::{
        delivery::{DeliveryQuote, DeliveryService},
        phone::normalize_kenyan_phone,
        pricing::{compose_totals, line_total, OrderTotals},
        promo_codes::{PromoCodeService, Redeemer},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

const MAX_LINE_QUANTITY: i32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Checkout payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 120, message = "Customer name is required"))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: Option<String>,
    #[validate(length(min = 9, max = 20, message = "Customer phone is required"))]
    pub customer_phone: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Delivery location id or exact display name
    #[validate(length(min = 1, message = "Delivery location is required"))]
    pub delivery_location: String,
    #[validate(length(max = 500))]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub express_delivery: bool,
    pub promo_code: Option<String>,
    #[validate(length(min = 1, message = "An order needs at least one item"))]
    pub items: Vec<OrderItemRequest>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Filter by fulfilment status
    pub status: Option<OrderStatus>,
}

impl OrderListQuery {
    pub fn pagination(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

/// Order with its lines
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Result of checkout, echoing how the total was built
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    #[serde(flatten)]
    pub details: OrderDetails,
    pub totals: OrderTotals,
    pub delivery: DeliveryQuote,
}

/// `HP-YYYYMMDD-XXXXXX` with a random upper-case hex suffix
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("HP-{}-{}", now.format("%Y%m%d"), suffix)
}

fn merge_lines(items: &[OrderItemRequest]) -> Result<BTreeMap<Uuid, i32>, ServiceError> {
    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }
        let entry = merged.entry(item.product_id).or_insert(0);
        *entry = entry.saturating_add(item.quantity);
        if *entry > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} exceeds {}",
                item.product_id, MAX_LINE_QUANTITY
            )));
        }
    }
    Ok(merged)
}

/// Checkout and order lifecycle
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    delivery: Arc<DeliveryService>,
    promo_codes: Arc<PromoCodeService>,
    event_sender: Option<EventSender>,
    currency: String,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        delivery: Arc<DeliveryService>,
        promo_codes: Arc<PromoCodeService>,
        event_sender: Option<EventSender>,
        currency: String,
    ) -> Self {
        Self {
            db_pool,
            delivery,
            promo_codes,
            event_sender,
            currency,
        }
    }

    /// Prices, stocks and persists an order in one transaction.
    ///
    /// Any failure (stock, delivery, promo exhaustion) rolls back every write,
    /// including the promo redemption and stock decrements.
    #[instrument(skip(self, request), fields(location = %request.delivery_location, items = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        request.validate()?;
        let lines = merge_lines(&request.items)?;
        let customer_phone = normalize_kenyan_phone(&request.customer_phone).ok_or_else(|| {
            ServiceError::ValidationError(
                "customer_phone must be a Kenyan mobile number".to_string(),
            )
        })?;
        let redeemer = Redeemer::new(request.user_id.clone(), request.session_id.clone());
        let promo_code = request
            .promo_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let db = &*self.db_pool;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        // Price lines from the catalog and reserve stock
        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(lines.keys().copied().collect::<Vec<_>>()))
            .all(&txn)
            .await?;

        let mut items = Vec::with_capacity(lines.len());
        let mut subtotal = rust_decimal::Decimal::ZERO;
        for (product_id, quantity) in &lines {
            let product = products
                .iter()
                .find(|p| p.id == *product_id)
                .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
            if !product.is_active {
                return Err(ServiceError::InvalidOperation(format!(
                    "Product {} is not available",
                    product.sku
                )));
            }

            reserve_stock(&txn, product, *quantity, now).await?;

            let total = line_total(product.price, *quantity);
            subtotal += total;
            items.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                sku: Set(product.sku.clone()),
                unit_price: Set(product.price),
                quantity: Set(*quantity),
                line_total: Set(total),
            });
        }

        let delivery = self
            .delivery
            .resolve(
                &txn,
                &request.delivery_location,
                subtotal,
                request.express_delivery,
            )
            .await?;

        let evaluation = match &promo_code {
            Some(code) => Some(
                self.promo_codes
                    .evaluate(&txn, code, subtotal, &redeemer)
                    .await?,
            ),
            None => None,
        };
        let discount = evaluation
            .as_ref()
            .map(|e| e.discount_amount)
            .unwrap_or_default();
        let totals = compose_totals(subtotal, discount, delivery.price);

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(now)),
            customer_name: Set(request.customer_name.trim().to_string()),
            customer_email: Set(request.customer_email),
            customer_phone: Set(customer_phone),
            user_id: Set(redeemer.user_id.clone()),
            session_id: Set(redeemer.session_id.clone()),
            delivery_location_id: Set(delivery.location_id.clone()),
            delivery_location_name: Set(delivery.location_name.clone()),
            delivery_address: Set(request.delivery_address),
            express_delivery: Set(delivery.express),
            subtotal: Set(totals.subtotal),
            discount_amount: Set(totals.discount_amount),
            promo_code: Set(evaluation.as_ref().map(|e| e.promo.code.clone())),
            shipping_cost: Set(totals.shipping_cost),
            total: Set(totals.total),
            paid_amount: Set(rust_decimal::Decimal::ZERO),
            currency: Set(self.currency.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(None),
            notes: Set(request.notes),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        let mut saved_items = Vec::with_capacity(items.len());
        for item in items {
            saved_items.push(item.insert(&txn).await?);
        }

        if let Some(evaluation) = &evaluation {
            self.promo_codes
                .redeem(&txn, evaluation, order_id, totals.subtotal, &redeemer)
                .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        counter!("household_planet.orders.created", 1);
        info!(
            order_id = %order_id,
            order_number = %order_model.order_number,
            subtotal = %totals.subtotal,
            discount = %totals.discount_amount,
            shipping = %totals.shipping_cost,
            total = %totals.total,
            "order created"
        );

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderCreated {
                    order_id,
                    order_number: order_model.order_number.clone(),
                    total: totals.total,
                    customer_phone: order_model.customer_phone.clone(),
                })
                .await;
            if let Some(evaluation) = &evaluation {
                sender
                    .send_or_log(Event::PromoCodeRedeemed {
                        promo_code_id: evaluation.promo.id,
                        code: evaluation.promo.code.clone(),
                        order_id,
                        discount_amount: evaluation.discount_amount,
                    })
                    .await;
            }
        }

        Ok(CreateOrderResponse {
            details: OrderDetails {
                order: order_model,
                items: saved_items,
            },
            totals,
            delivery,
        })
    }

    /// Looks an order up by UUID or by order number
    pub async fn get_order(&self, id_or_number: &str) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db_pool;
        let order = match Uuid::parse_str(id_or_number) {
            Ok(id) => OrderEntity::find_by_id(id).one(db).await?,
            Err(_) => {
                OrderEntity::find()
                    .filter(order::Column::OrderNumber.eq(id_or_number))
                    .one(db)
                    .await?
            }
        }
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id_or_number)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(db)
            .await?;

        Ok(OrderDetails { order, items })
    }

    pub async fn list_orders(
        &self,
        pagination: &PaginationParams,
        status: Option<OrderStatus>,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        let paginator = query.paginate(&*self.db_pool, pagination.limit());
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(pagination.page_index()).await?;
        Ok((orders, total))
    }

    /// Admin fulfilment transition; cancelling returns reserved stock
    #[instrument(skip(self, request), fields(order_id = %order_id, new_status = %request.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        request: UpdateOrderStatusRequest,
    ) -> Result<OrderModel, ServiceError> {
        request.validate()?;
        let txn = self.db_pool.begin().await?;

        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = current.status;
        if !old_status.can_transition_to(request.status) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move order {} from {} to {}",
                current.order_number, old_status, request.status
            )));
        }

        if request.status == OrderStatus::Cancelled {
            if current.paid_amount > rust_decimal::Decimal::ZERO {
                warn!(order_id = %order_id, paid = %current.paid_amount, "cancelling an order with payments; refund manually");
            }
            restore_stock(&txn, order_id).await?;
        }

        let order_number = current.order_number.clone();
        let mut active: order::ActiveModel = current.into();
        active.status = Set(request.status);
        active.updated_at = Set(Utc::now());
        if let Some(notes) = request.notes {
            active.notes = Set(Some(notes));
        }
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(%old_status, new_status = %updated.status, "order status updated");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    order_number,
                    old_status,
                    new_status: updated.status,
                })
                .await;
        }
        Ok(updated)
    }
}

/// Conditional decrement; zero rows means someone else took the stock first
async fn reserve_stock<C: ConnectionTrait>(
    txn: &C,
    product: &product::Model,
    quantity: i32,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = ProductEntity::update_many()
        .col_expr(
            product::Column::StockQuantity,
            Expr::col(product::Column::StockQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::StockQuantity.gte(quantity))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "{}: requested {}, available {}",
            product.sku, quantity, product.stock_quantity
        )));
    }
    Ok(())
}

async fn restore_stock<C: ConnectionTrait>(txn: &C, order_id: Uuid) -> Result<(), ServiceError> {
    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(txn)
        .await?;
    let now = Utc::now();
    for item in items {
        ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(item.quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(now))
            .filter(product::Column::Id.eq(item.product_id))
            .exec(txn)
            .await?;
    }
    Ok(())
}

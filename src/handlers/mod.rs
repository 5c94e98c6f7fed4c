pub mod common;
pub mod delivery;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod products;
pub mod promo_codes;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::services::{
    delivery::DeliveryService, orders::OrderService, payments::PaymentService,
    products::ProductService, promo_codes::PromoCodeService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub delivery: Arc<DeliveryService>,
    pub promo_codes: Arc<PromoCodeService>,
    pub products: Arc<ProductService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service against one pool and event channel
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Option<EventSender>,
    ) -> Result<Self, ServiceError> {
        let delivery = Arc::new(DeliveryService::new(
            db_pool.clone(),
            config.free_shipping_threshold,
        ));
        let promo_codes = Arc::new(PromoCodeService::new(db_pool.clone()));
        let products = Arc::new(ProductService::new(db_pool.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            delivery.clone(),
            promo_codes.clone(),
            event_sender.clone(),
            config.currency.clone(),
        ));
        let payments = Arc::new(PaymentService::from_config(db_pool, config, event_sender)?);

        Ok(Self {
            delivery,
            promo_codes,
            products,
            orders,
            payments,
        })
    }
}

pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;
pub mod promo_code;
pub mod promo_code_usage;
pub mod setting;

use crate::services::promo_codes::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Monetary breakdown persisted on every order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

/// `total = subtotal - discount + shipping`.
///
/// The discount was computed against the subtotal only, so it never touches
/// the shipping charge.
pub fn compose_totals(subtotal: Decimal, discount_amount: Decimal, shipping_cost: Decimal) -> OrderTotals {
    let subtotal = round_money(subtotal);
    let discount_amount = round_money(discount_amount.min(subtotal).max(Decimal::ZERO));
    let shipping_cost = round_money(shipping_cost);
    OrderTotals {
        subtotal,
        discount_amount,
        shipping_cost,
        total: subtotal - discount_amount + shipping_cost,
    }
}

/// Line total for `quantity` units at `unit_price`
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

// Storefront catalogue
pub mod products;

// Checkout pricing
pub mod delivery;
pub mod pricing;
pub mod promo_codes;

// Orders and settlement
pub mod orders;
pub mod payments;

// Shared helpers
pub mod patch;
pub mod phone;

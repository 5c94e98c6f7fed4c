use crate::{
    db::DbPool,
    entities::setting::{self, Entity as SettingEntity},
    errors::ServiceError,
    services::patch,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

/// Settings key prefix under which each location document is stored
pub const LOCATION_KEY_PREFIX: &str = "delivery_locations.location_";
/// Settings category for delivery rows
pub const DELIVERY_CATEGORY: &str = "delivery";

/// A named delivery zone with a flat price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLocation {
    pub id: String,
    /// Unique display name, matched case-sensitively
    pub name: String,
    /// Informational grouping, 1 (nearest) to 4
    pub tier: u8,
    pub price: Decimal,
    #[serde(alias = "estimatedDays")]
    pub estimated_days: String,
    #[serde(default, alias = "expressAvailable")]
    pub express_available: bool,
    #[serde(default, alias = "expressPrice")]
    pub express_price: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DeliveryLocation {
    fn settings_key(&self) -> String {
        location_key(&self.id)
    }
}

fn location_key(id: &str) -> String {
    format!("{}{}", LOCATION_KEY_PREFIX, id)
}

/// Outcome of pricing delivery for one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeliveryQuote {
    pub location_id: String,
    pub location_name: String,
    pub price: Decimal,
    pub free_shipping: bool,
    /// Whether the express rate was applied
    pub express: bool,
    pub estimated_days: String,
    pub free_shipping_threshold: Decimal,
}

/// Prices delivery to `location` for an order of `subtotal`.
///
/// Orders at or above the threshold ship free regardless of the express flag.
pub fn price_delivery(
    location: &DeliveryLocation,
    subtotal: Decimal,
    express: bool,
    free_shipping_threshold: Decimal,
) -> Result<DeliveryQuote, ServiceError> {
    let mut quote = DeliveryQuote {
        location_id: location.id.clone(),
        location_name: location.name.clone(),
        price: location.price,
        free_shipping: false,
        express: false,
        estimated_days: location.estimated_days.clone(),
        free_shipping_threshold,
    };

    if subtotal >= free_shipping_threshold {
        quote.price = Decimal::ZERO;
        quote.free_shipping = true;
        return Ok(quote);
    }

    if express {
        match (location.express_available, location.express_price) {
            (true, Some(express_price)) => {
                quote.price = express_price;
                quote.express = true;
            }
            _ => return Err(ServiceError::ExpressNotAvailable(location.name.clone())),
        }
    }

    Ok(quote)
}

/// Lower-case, dash-separated identifier derived from a display name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateDeliveryLocationRequest {
    /// Defaults to a slug of the name
    #[validate(length(min = 1, max = 100))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 120, message = "Location name is required"))]
    pub name: String,
    #[validate(range(min = 1, max = 4, message = "Tier must be between 1 and 4"))]
    pub tier: u8,
    pub price: Decimal,
    #[validate(length(min = 1, max = 32))]
    pub estimated_days: String,
    #[serde(default)]
    pub express_available: bool,
    pub express_price: Option<Decimal>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateDeliveryLocationRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(range(min = 1, max = 4))]
    pub tier: Option<u8>,
    pub price: Option<Decimal>,
    #[validate(length(min = 1, max = 32))]
    pub estimated_days: Option<String>,
    pub express_available: Option<bool>,
    /// `null` removes the express rate
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<String>)]
    pub express_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct DeliveryQuoteRequest {
    /// Location id or exact display name
    #[validate(length(min = 1))]
    pub location: String,
    pub subtotal: Decimal,
    #[serde(default)]
    pub express: bool,
}

fn check_prices(location: &DeliveryLocation) -> Result<(), ServiceError> {
    if location.price.is_sign_negative() {
        return Err(ServiceError::ValidationError(
            "price must not be negative".to_string(),
        ));
    }
    match (location.express_available, location.express_price) {
        (true, None) => Err(ServiceError::ValidationError(
            "express_price is required when express delivery is available".to_string(),
        )),
        (_, Some(p)) if p.is_sign_negative() => Err(ServiceError::ValidationError(
            "express_price must not be negative".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Admin-managed delivery pricing table stored in `settings`
#[derive(Clone)]
pub struct DeliveryService {
    db_pool: Arc<DbPool>,
    free_shipping_threshold: Decimal,
}

impl DeliveryService {
    pub fn new(db_pool: Arc<DbPool>, free_shipping_threshold: Decimal) -> Self {
        Self {
            db_pool,
            free_shipping_threshold,
        }
    }

    pub fn free_shipping_threshold(&self) -> Decimal {
        self.free_shipping_threshold
    }

    /// All locations, ordered by tier then name
    pub async fn list_locations(&self) -> Result<Vec<DeliveryLocation>, ServiceError> {
        let mut locations = load_all(&*self.db_pool).await?;
        locations.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.name.cmp(&b.name)));
        Ok(locations)
    }

    pub async fn get_location(&self, id: &str) -> Result<DeliveryLocation, ServiceError> {
        find_by_id(&*self.db_pool, id)
            .await?
            .ok_or_else(|| ServiceError::LocationNotFound(id.to_string()))
    }

    /// Looks a location up by id, then by exact name
    pub async fn find_location<C: ConnectionTrait>(
        &self,
        conn: &C,
        id_or_name: &str,
    ) -> Result<DeliveryLocation, ServiceError> {
        if let Some(location) = find_by_id(conn, id_or_name).await? {
            return Ok(location);
        }
        load_all(conn)
            .await?
            .into_iter()
            .find(|l| l.name == id_or_name)
            .ok_or_else(|| ServiceError::LocationNotFound(id_or_name.to_string()))
    }

    /// Resolves the delivery price for an order on the caller's connection
    #[instrument(skip(self, conn), fields(location = %id_or_name, %subtotal, express))]
    pub async fn resolve<C: ConnectionTrait>(
        &self,
        conn: &C,
        id_or_name: &str,
        subtotal: Decimal,
        express: bool,
    ) -> Result<DeliveryQuote, ServiceError> {
        let location = self.find_location(conn, id_or_name).await?;
        price_delivery(&location, subtotal, express, self.free_shipping_threshold)
    }

    pub async fn quote(&self, request: DeliveryQuoteRequest) -> Result<DeliveryQuote, ServiceError> {
        request.validate()?;
        if request.subtotal.is_sign_negative() {
            return Err(ServiceError::ValidationError(
                "subtotal must not be negative".to_string(),
            ));
        }
        self.resolve(
            &*self.db_pool,
            &request.location,
            request.subtotal,
            request.express,
        )
        .await
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_location(
        &self,
        request: CreateDeliveryLocationRequest,
    ) -> Result<DeliveryLocation, ServiceError> {
        request.validate()?;

        let id = match request.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => slugify(&request.name),
        };
        if id.is_empty() {
            return Err(ServiceError::ValidationError(
                "location id could not be derived from the name".to_string(),
            ));
        }

        let location = DeliveryLocation {
            id,
            name: request.name.trim().to_string(),
            tier: request.tier,
            price: request.price,
            estimated_days: request.estimated_days,
            express_available: request.express_available,
            express_price: request.express_price,
            description: request.description,
        };
        check_prices(&location)?;

        let db = &*self.db_pool;
        let existing = load_all(db).await?;
        if existing.iter().any(|l| l.id == location.id) {
            return Err(ServiceError::Conflict(format!(
                "delivery location id {} already exists",
                location.id
            )));
        }
        if existing.iter().any(|l| l.name == location.name) {
            return Err(ServiceError::Conflict(format!(
                "delivery location {} already exists",
                location.name
            )));
        }

        let now = Utc::now();
        setting::ActiveModel {
            key: Set(location.settings_key()),
            value: Set(serde_json::to_string(&location)?),
            category: Set(DELIVERY_CATEGORY.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(location_id = %location.id, price = %location.price, "delivery location created");
        Ok(location)
    }

    /// Applies a partial update; orders already placed keep their frozen shipping cost
    #[instrument(skip(self, request))]
    pub async fn update_location(
        &self,
        id: &str,
        request: UpdateDeliveryLocationRequest,
    ) -> Result<DeliveryLocation, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;

        let row = SettingEntity::find_by_id(location_key(id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::LocationNotFound(id.to_string()))?;
        let mut location: DeliveryLocation = serde_json::from_str(&row.value)?;

        if let Some(name) = request.name {
            let name = name.trim().to_string();
            if name != location.name
                && load_all(db).await?.iter().any(|l| l.name == name && l.id != id)
            {
                return Err(ServiceError::Conflict(format!(
                    "delivery location {} already exists",
                    name
                )));
            }
            location.name = name;
        }
        if let Some(tier) = request.tier {
            location.tier = tier;
        }
        if let Some(price) = request.price {
            location.price = price;
        }
        if let Some(days) = request.estimated_days {
            location.estimated_days = days;
        }
        if let Some(express_available) = request.express_available {
            location.express_available = express_available;
        }
        patch::apply(&mut location.express_price, request.express_price);
        if let Some(Some(description)) = &request.description {
            if description.len() > 500 {
                return Err(ServiceError::ValidationError(
                    "description must be at most 500 characters".to_string(),
                ));
            }
        }
        patch::apply(&mut location.description, request.description);
        check_prices(&location)?;

        let mut active: setting::ActiveModel = row.into();
        active.value = Set(serde_json::to_string(&location)?);
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        info!(location_id = %location.id, price = %location.price, "delivery location updated");
        Ok(location)
    }

    #[instrument(skip(self))]
    pub async fn delete_location(&self, id: &str) -> Result<(), ServiceError> {
        let result = SettingEntity::delete_by_id(location_key(id))
            .exec(&*self.db_pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::LocationNotFound(id.to_string()));
        }
        info!(location_id = %id, "delivery location deleted");
        Ok(())
    }
}

async fn find_by_id<C: ConnectionTrait>(
    conn: &C,
    id: &str,
) -> Result<Option<DeliveryLocation>, ServiceError> {
    match SettingEntity::find_by_id(location_key(id)).one(conn).await? {
        Some(row) => Ok(Some(serde_json::from_str(&row.value)?)),
        None => Ok(None),
    }
}

async fn load_all<C: ConnectionTrait>(conn: &C) -> Result<Vec<DeliveryLocation>, ServiceError> {
    let rows = SettingEntity::find()
        .filter(setting::Column::Key.starts_with(LOCATION_KEY_PREFIX))
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_str::<DeliveryLocation>(&row.value) {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(key = %row.key, error = %e, "skipping malformed delivery location");
                None
            }
        })
        .collect())
}

use crate::{
    db::DbPool,
    entities::promo_code::{self, DiscountType, Entity as PromoCodeEntity, Model as PromoCodeModel},
    entities::promo_code_usage::{self, Entity as PromoCodeUsageEntity},
    errors::{PromoCodeRejection, ServiceError},
    handlers::common::PaginationParams,
    services::patch,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Codes are matched case-insensitively by storing them upper-case
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Rounds a money amount to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Discount the code grants on `order_amount`, never more than the amount itself.
///
/// Amounts too large to multiply are a validation error.
pub fn compute_discount(promo: &PromoCodeModel, order_amount: Decimal) -> Result<Decimal, ServiceError> {
    let raw = match promo.discount_type {
        DiscountType::Percentage => {
            let pct = order_amount
                .checked_mul(promo.discount_value)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "order amount {} is out of range",
                        order_amount
                    ))
                })?
                / Decimal::ONE_HUNDRED;
            match promo.max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        DiscountType::Fixed => promo.discount_value.min(order_amount),
    };
    Ok(round_money(raw.max(Decimal::ZERO).min(order_amount)))
}

/// Validity checks that need only the code row, in evaluation order
pub fn check_eligibility(
    promo: &PromoCodeModel,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(), PromoCodeRejection> {
    if !promo.is_active {
        return Err(PromoCodeRejection::Inactive(promo.code.clone()));
    }
    let not_started = now < promo.valid_from;
    let ended = promo.valid_until.map_or(false, |until| now > until);
    if not_started || ended {
        return Err(PromoCodeRejection::Expired(promo.code.clone()));
    }
    if let Some(minimum) = promo.min_order_amount {
        if order_amount < minimum {
            return Err(PromoCodeRejection::MinimumNotMet { minimum });
        }
    }
    if let Some(limit) = promo.usage_limit {
        if promo.usage_count >= limit {
            return Err(PromoCodeRejection::UsageLimitReached(promo.code.clone()));
        }
    }
    Ok(())
}

/// Who is redeeming a code; per-customer limits are skipped when both are absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redeemer {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl Redeemer {
    pub fn new(user_id: Option<String>, session_id: Option<String>) -> Self {
        let clean = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            user_id: clean(user_id),
            session_id: clean(session_id),
        }
    }

    fn usage_filter(&self) -> Option<Condition> {
        match (&self.user_id, &self.session_id) {
            (Some(user_id), _) => {
                Some(Condition::all().add(promo_code_usage::Column::UserId.eq(user_id.clone())))
            }
            (None, Some(session_id)) => Some(
                Condition::all().add(promo_code_usage::Column::SessionId.eq(session_id.clone())),
            ),
            (None, None) => None,
        }
    }
}

/// A code that passed every check, with the discount it grants
#[derive(Debug, Clone, PartialEq)]
pub struct PromoEvaluation {
    pub promo: PromoCodeModel,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ValidatePromoCodeRequest {
    #[validate(length(min = 1, max = 64, message = "Promo code is required"))]
    pub code: String,
    pub order_amount: Decimal,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidatePromoCodeResponse {
    pub valid: bool,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePromoCodeRequest {
    #[validate(length(min = 2, max = 64, message = "Code must be between 2 and 64 characters"))]
    pub code: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[validate(range(min = 1))]
    pub user_usage_limit: Option<i32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdatePromoCodeRequest {
    /// `null` clears the field on this and every other optional term
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Decimal>,
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<String>)]
    pub min_order_amount: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<String>)]
    pub max_discount: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<i32>)]
    pub usage_limit: Option<Option<i32>>,
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<i32>)]
    pub user_usage_limit: Option<Option<i32>>,
    pub is_active: Option<bool>,
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "patch::nullable")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub valid_until: Option<Option<DateTime<Utc>>>,
}

fn check_terms(promo: &PromoCodeModel) -> Result<(), ServiceError> {
    if promo.discount_value <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "discount_value must be positive".to_string(),
        ));
    }
    if promo.discount_type == DiscountType::Percentage
        && promo.discount_value > Decimal::ONE_HUNDRED
    {
        return Err(ServiceError::ValidationError(
            "percentage discount_value must be at most 100".to_string(),
        ));
    }
    if promo.max_discount.map_or(false, |cap| cap <= Decimal::ZERO) {
        return Err(ServiceError::ValidationError(
            "max_discount must be positive".to_string(),
        ));
    }
    if promo
        .min_order_amount
        .map_or(false, |min| min.is_sign_negative())
    {
        return Err(ServiceError::ValidationError(
            "min_order_amount must not be negative".to_string(),
        ));
    }
    if let Some(until) = promo.valid_until {
        if until <= promo.valid_from {
            return Err(ServiceError::ValidationError(
                "valid_until must be after valid_from".to_string(),
            ));
        }
    }
    if promo.usage_limit.map_or(false, |limit| limit < 1)
        || promo.user_usage_limit.map_or(false, |limit| limit < 1)
    {
        return Err(ServiceError::ValidationError(
            "usage limits must be at least 1".to_string(),
        ));
    }
    if let Some(limit) = promo.usage_limit {
        if promo.usage_count > limit {
            return Err(ServiceError::ValidationError(format!(
                "usage_limit {} is below the {} redemptions already made",
                limit, promo.usage_count
            )));
        }
    }
    Ok(())
}

/// Promo code evaluation, redemption and administration
#[derive(Clone)]
pub struct PromoCodeService {
    db_pool: Arc<DbPool>,
}

impl PromoCodeService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Runs every check in order and computes the discount
    #[instrument(skip(self, conn, redeemer), fields(code = %code, %order_amount))]
    pub async fn evaluate<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        order_amount: Decimal,
        redeemer: &Redeemer,
    ) -> Result<PromoEvaluation, ServiceError> {
        let code = normalize_code(code);
        let promo = PromoCodeEntity::find()
            .filter(promo_code::Column::Code.eq(code.clone()))
            .one(conn)
            .await?
            .ok_or_else(|| PromoCodeRejection::NotFound(code.clone()))?;

        check_eligibility(&promo, order_amount, Utc::now())?;
        check_user_limit(conn, &promo, redeemer).await?;

        let discount_amount = compute_discount(&promo, order_amount)?;
        let final_amount = (order_amount - discount_amount).max(Decimal::ZERO);
        debug!(%discount_amount, %final_amount, "promo code accepted");

        Ok(PromoEvaluation {
            promo,
            discount_amount,
            final_amount,
        })
    }

    /// Read-only check used by the storefront before checkout
    pub async fn validate(
        &self,
        request: ValidatePromoCodeRequest,
    ) -> Result<ValidatePromoCodeResponse, ServiceError> {
        request.validate()?;
        if request.order_amount.is_sign_negative() {
            return Err(ServiceError::ValidationError(
                "order_amount must not be negative".to_string(),
            ));
        }
        let redeemer = Redeemer::new(request.user_id, request.session_id);
        let evaluation = self
            .evaluate(&*self.db_pool, &request.code, request.order_amount, &redeemer)
            .await?;

        Ok(ValidatePromoCodeResponse {
            valid: true,
            code: evaluation.promo.code,
            description: evaluation.promo.description,
            discount_type: evaluation.promo.discount_type,
            discount_value: evaluation.promo.discount_value,
            discount_amount: evaluation.discount_amount,
            final_amount: evaluation.final_amount,
        })
    }

    /// Claims one use of the code inside the caller's transaction.
    ///
    /// The increment is a single conditional UPDATE, so concurrent checkouts can
    /// never push `usage_count` past `usage_limit`. The per-customer count runs
    /// after it, while the code row is write-locked.
    #[instrument(skip(self, txn, evaluation, redeemer), fields(code = %evaluation.promo.code, %order_id))]
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        txn: &C,
        evaluation: &PromoEvaluation,
        order_id: Uuid,
        order_amount: Decimal,
        redeemer: &Redeemer,
    ) -> Result<(), ServiceError> {
        let promo = &evaluation.promo;
        let now = Utc::now();

        let claimed = PromoCodeEntity::update_many()
            .col_expr(
                promo_code::Column::UsageCount,
                Expr::col(promo_code::Column::UsageCount).add(1),
            )
            .col_expr(promo_code::Column::UpdatedAt, Expr::value(now))
            .filter(promo_code::Column::Id.eq(promo.id))
            .filter(promo_code::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(promo_code::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(promo_code::Column::UsageCount)
                            .lt(Expr::col(promo_code::Column::UsageLimit)),
                    ),
            )
            .exec(txn)
            .await?;

        if claimed.rows_affected == 0 {
            warn!(code = %promo.code, "promo code exhausted during checkout");
            counter!("household_planet.promo_codes.exhausted", 1);
            return Err(PromoCodeRejection::UsageLimitReached(promo.code.clone()).into());
        }

        check_user_limit(txn, promo, redeemer).await?;

        promo_code_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            promo_code_id: Set(promo.id),
            user_id: Set(redeemer.user_id.clone()),
            session_id: Set(redeemer.session_id.clone()),
            order_id: Set(order_id),
            discount_amount: Set(evaluation.discount_amount),
            order_amount: Set(order_amount),
            used_at: Set(now),
        }
        .insert(txn)
        .await?;

        counter!("household_planet.promo_codes.redeemed", 1);
        Ok(())
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(
        &self,
        request: CreatePromoCodeRequest,
    ) -> Result<PromoCodeModel, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        let code = normalize_code(&request.code);

        let exists = PromoCodeEntity::find()
            .filter(promo_code::Column::Code.eq(code.clone()))
            .count(db)
            .await?;
        if exists > 0 {
            return Err(ServiceError::Conflict(format!(
                "promo code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let promo = PromoCodeModel {
            id: Uuid::new_v4(),
            code,
            description: request.description,
            discount_type: request.discount_type,
            discount_value: request.discount_value,
            min_order_amount: request.min_order_amount,
            max_discount: request.max_discount,
            usage_limit: request.usage_limit,
            usage_count: 0,
            user_usage_limit: request.user_usage_limit,
            is_active: request.is_active,
            valid_from: request.valid_from.unwrap_or(now),
            valid_until: request.valid_until,
            created_at: now,
            updated_at: now,
        };
        check_terms(&promo)?;

        let saved = writable(promo).insert(db).await?;
        info!(promo_code_id = %saved.id, code = %saved.code, "promo code created");
        Ok(saved)
    }

    pub async fn list(
        &self,
        pagination: &PaginationParams,
        active_only: bool,
    ) -> Result<(Vec<PromoCodeModel>, u64), ServiceError> {
        let mut query = PromoCodeEntity::find().order_by_desc(promo_code::Column::CreatedAt);
        if active_only {
            query = query.filter(promo_code::Column::IsActive.eq(true));
        }
        let paginator = query.paginate(&*self.db_pool, pagination.limit());
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(pagination.page_index()).await?;
        Ok((items, total))
    }

    pub async fn get(&self, id: Uuid) -> Result<PromoCodeModel, ServiceError> {
        PromoCodeEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Promo code {} not found", id)))
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdatePromoCodeRequest,
    ) -> Result<PromoCodeModel, ServiceError> {
        request.validate()?;
        let mut promo = self.get(id).await?;

        if let Some(Some(description)) = &request.description {
            if description.len() > 500 {
                return Err(ServiceError::ValidationError(
                    "description must be at most 500 characters".to_string(),
                ));
            }
        }
        patch::apply(&mut promo.description, request.description);
        if let Some(discount_type) = request.discount_type {
            promo.discount_type = discount_type;
        }
        if let Some(value) = request.discount_value {
            promo.discount_value = value;
        }
        patch::apply(&mut promo.min_order_amount, request.min_order_amount);
        patch::apply(&mut promo.max_discount, request.max_discount);
        patch::apply(&mut promo.usage_limit, request.usage_limit);
        patch::apply(&mut promo.user_usage_limit, request.user_usage_limit);
        if let Some(is_active) = request.is_active {
            promo.is_active = is_active;
        }
        if let Some(valid_from) = request.valid_from {
            promo.valid_from = valid_from;
        }
        patch::apply(&mut promo.valid_until, request.valid_until);
        check_terms(&promo)?;

        // usage_count is left untouched so a concurrent redemption is never overwritten
        let mut active = writable(promo);
        active.id = ActiveValue::Unchanged(id);
        active.usage_count = ActiveValue::NotSet;
        active.created_at = ActiveValue::NotSet;
        active.updated_at = Set(Utc::now());
        let saved = active.update(&*self.db_pool).await?;
        info!(promo_code_id = %id, "promo code updated");
        Ok(saved)
    }

    /// Soft delete; the ledger keeps referencing the row
    #[instrument(skip(self))]
    pub async fn deactivate(&self, id: Uuid) -> Result<PromoCodeModel, ServiceError> {
        let promo = self.get(id).await?;
        let mut active: promo_code::ActiveModel = promo.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let saved = active.update(&*self.db_pool).await?;
        info!(promo_code_id = %id, "promo code deactivated");
        Ok(saved)
    }

    pub async fn usages(
        &self,
        id: Uuid,
    ) -> Result<Vec<promo_code_usage::Model>, ServiceError> {
        self.get(id).await?;
        Ok(PromoCodeUsageEntity::find()
            .filter(promo_code_usage::Column::PromoCodeId.eq(id))
            .order_by_desc(promo_code_usage::Column::UsedAt)
            .all(&*self.db_pool)
            .await?)
    }
}

fn writable(promo: PromoCodeModel) -> promo_code::ActiveModel {
    promo_code::ActiveModel {
        id: Set(promo.id),
        code: Set(promo.code),
        description: Set(promo.description),
        discount_type: Set(promo.discount_type),
        discount_value: Set(promo.discount_value),
        min_order_amount: Set(promo.min_order_amount),
        max_discount: Set(promo.max_discount),
        usage_limit: Set(promo.usage_limit),
        usage_count: Set(promo.usage_count),
        user_usage_limit: Set(promo.user_usage_limit),
        is_active: Set(promo.is_active),
        valid_from: Set(promo.valid_from),
        valid_until: Set(promo.valid_until),
        created_at: Set(promo.created_at),
        updated_at: Set(promo.updated_at),
    }
}

async fn check_user_limit<C: ConnectionTrait>(
    conn: &C,
    promo: &PromoCodeModel,
    redeemer: &Redeemer,
) -> Result<(), ServiceError> {
    let (Some(limit), Some(identity)) = (promo.user_usage_limit, redeemer.usage_filter()) else {
        return Ok(());
    };
    let used = PromoCodeUsageEntity::find()
        .filter(promo_code_usage::Column::PromoCodeId.eq(promo.id))
        .filter(identity)
        .count(conn)
        .await?;
    if used >= limit.max(0) as u64 {
        return Err(PromoCodeRejection::UserLimitReached(promo.code.clone()).into());
    }
    Ok(())
}

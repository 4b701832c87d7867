use crate::{
    db::DbPool,
    entities::{coupon, coupon_redemption},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Coupon lookup, evaluation, and the one-use-per-customer ledger.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

/// Result of evaluating a coupon code against a cart amount.
///
/// Every rejection is a value, not an error: an unusable coupon is a
/// normal answer to the question "can I use this?".
#[derive(Debug, Clone, PartialEq)]
pub enum CouponEvaluation {
    Valid { code: String, discount: Decimal },
    Invalid { message: String },
}

impl CouponEvaluation {
    fn invalid(message: impl Into<String>) -> Self {
        CouponEvaluation::Invalid {
            message: message.into(),
        }
    }
}

impl CouponService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn find_active(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code.trim().to_uppercase()))
            .filter(coupon::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?)
    }

    pub async fn was_redeemed_by(
        &self,
        coupon_id: Uuid,
        customer_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(coupon_redemption::Entity::find()
            .filter(coupon_redemption::Column::CouponId.eq(coupon_id))
            .filter(coupon_redemption::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .is_some())
    }

    /// Decide whether `customer_id` may apply `code` to an order of
    /// `amount`, and what the discount would be. Checks run in a fixed
    /// order so the caller always gets the most specific rejection:
    /// existence, prior use, allow list, then amount thresholds.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        code: &str,
        amount: Decimal,
        customer_id: Uuid,
    ) -> Result<CouponEvaluation, ServiceError> {
        let Some(coupon) = self.find_active(code).await? else {
            return Ok(CouponEvaluation::invalid("Invalid coupon code"));
        };

        if self.was_redeemed_by(coupon.id, customer_id).await? {
            return Ok(CouponEvaluation::invalid("Coupon already used"));
        }

        let allow_list = coupon.allow_list();
        if !allow_list.is_empty() && !allow_list.contains(&customer_id) {
            return Ok(CouponEvaluation::invalid(
                "This coupon is not applicable to your account",
            ));
        }

        if let Some(min) = coupon.min_order_amount {
            if amount < min {
                return Ok(CouponEvaluation::invalid(format!(
                    "This coupon requires a minimum order amount of {}",
                    min.normalize()
                )));
            }
        }

        if let Some(max) = coupon.max_order_amount {
            if amount > max {
                return Ok(CouponEvaluation::invalid(format!(
                    "This coupon is only valid for orders up to {}",
                    max.normalize()
                )));
            }
        }

        Ok(CouponEvaluation::Valid {
            code: coupon.code.clone(),
            discount: compute_discount(&coupon, amount),
        })
    }

    /// Record that a customer has used a coupon. The unique
    /// (coupon_id, customer_id) index makes this an atomic add-if-absent:
    /// a second redemption for the same pair is silently a no-op, which is
    /// what a retried settlement call needs.
    #[instrument(skip(self))]
    pub async fn redeem(
        &self,
        coupon_id: Uuid,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let row = coupon_redemption::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon_id),
            customer_id: Set(customer_id),
            order_id: Set(order_id),
            redeemed_at: Set(Utc::now()),
        };

        let insert = coupon_redemption::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    coupon_redemption::Column::CouponId,
                    coupon_redemption::Column::CustomerId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&*self.db)
            .await;

        match insert {
            Ok(_) => {
                info!(%coupon_id, %customer_id, %order_id, "Coupon redeemed");
                self.event_sender
                    .send_or_log(Event::CouponRedeemed {
                        coupon_id,
                        customer_id,
                        order_id,
                    })
                    .await;
                Ok(())
            }
            // Conflict with an earlier redemption by the same customer.
            Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Discount for a coupon applied to `amount`. Flat coupons use their fixed
/// amount; percentage coupons round half away from zero to whole currency
/// units. The result is clamped into `[0, amount]` so a discount can never
/// exceed what is being discounted.
pub fn compute_discount(coupon: &coupon::Model, amount: Decimal) -> Decimal {
    let raw = if let Some(flat) = coupon.amount_off {
        flat
    } else if let Some(percent) = coupon.percent_off {
        (amount * percent / Decimal::from(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ZERO
    };

    raw.clamp(Decimal::ZERO, amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn coupon_with(amount_off: Option<Decimal>, percent_off: Option<Decimal>) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST10".to_string(),
            is_active: true,
            allowed_customer_ids: None,
            min_order_amount: None,
            max_order_amount: None,
            amount_off,
            percent_off,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn flat_discount_is_used_verbatim() {
        let c = coupon_with(Some(dec!(150)), None);
        assert_eq!(compute_discount(&c, dec!(1000)), dec!(150));
    }

    #[test]
    fn flat_discount_clamps_to_amount() {
        let c = coupon_with(Some(dec!(500)), None);
        assert_eq!(compute_discount(&c, dec!(300)), dec!(300));
    }

    #[test]
    fn percent_discount_rounds_half_away_from_zero() {
        let c = coupon_with(None, Some(dec!(15)));
        // 15% of 1130 = 169.5, rounds up to 170
        assert_eq!(compute_discount(&c, dec!(1130)), dec!(170));
    }

    #[test]
    fn coupon_with_neither_field_discounts_nothing() {
        let c = coupon_with(None, None);
        assert_eq!(compute_discount(&c, dec!(1000)), Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn discount_stays_within_bounds(
            amount in 0u64..10_000_000,
            percent in 0u64..200,
            flat in proptest::option::of(0u64..1_000_000),
        ) {
            let coupon = coupon_with(
                flat.map(Decimal::from),
                if flat.is_none() { Some(Decimal::from(percent)) } else { None },
            );
            let amount = Decimal::from(amount);
            let discount = compute_discount(&coupon, amount);
            prop_assert!(discount >= Decimal::ZERO);
            prop_assert!(discount <= amount);
        }
    }
}

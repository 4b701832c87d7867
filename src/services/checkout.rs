use crate::{
    config::CouponRedemptionPolicy,
    db::DbPool,
    entities::{
        cart_item, customer,
        order::{self, FulfillmentStage, PaymentStage},
        order_history, order_item, product, product_variant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentGateway,
    services::{carts::CartService, coupons::CouponService, inventory::InventoryService},
};
use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// The settlement engine: order creation from the cart, payment intent
/// minting against the gateway, and signature-verified settlement with its
/// side effects.
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    carts: Arc<CartService>,
    coupons: Arc<CouponService>,
    inventory: Arc<InventoryService>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    redemption_policy: CouponRedemptionPolicy,
}

/// Client-declared totals for an order. The engine recomputes the subtotal
/// from the cart and refuses to proceed when the numbers disagree.
#[derive(Debug, Clone)]
pub struct OrderTotals {
    pub total_mrp: Decimal,
    pub coupon_code: Option<String>,
    pub discount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuyerInfo {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub reused: bool,
    pub buyer: BuyerInfo,
}

/// Everything a client needs to open the gateway checkout UI.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Clone)]
pub struct PaymentProof {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

struct LineSnapshot {
    variant_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
    product_name: String,
    size: String,
    colour: String,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        carts: Arc<CartService>,
        coupons: Arc<CouponService>,
        inventory: Arc<InventoryService>,
        gateway: Arc<dyn PaymentGateway>,
        currency: String,
        redemption_policy: CouponRedemptionPolicy,
    ) -> Self {
        Self {
            db,
            event_sender,
            carts,
            coupons,
            inventory,
            gateway,
            currency,
            redemption_policy,
        }
    }

    /// Create a pending order from the customer's cart, or reuse an
    /// existing unpaid order with identical totals so a retried checkout
    /// never piles up duplicates.
    #[instrument(skip(self, totals))]
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        totals: OrderTotals,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let customer = customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Customer not found".to_string()))?;

        let cart = self
            .carts
            .find_by_customer(customer_id)
            .await?
            .ok_or_else(|| ServiceError::InvalidOperation("Cart is empty".to_string()))?;

        let snapshot = self.snapshot_cart(cart.id).await?;
        if snapshot.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        let computed_subtotal: Decimal = snapshot
            .iter()
            .map(|l| l.unit_price * Decimal::from(l.quantity))
            .sum();
        if computed_subtotal != totals.total_mrp {
            return Err(ServiceError::ValidationError(
                "Order subtotal does not match the cart".to_string(),
            ));
        }
        if totals.total_mrp - totals.discount != totals.total {
            return Err(ServiceError::ValidationError(
                "Order totals do not add up".to_string(),
            ));
        }

        let existing = self.find_reusable_order(customer_id, &totals).await?;
        let reused = existing.is_some();

        let coupon = match (&totals.coupon_code, reused) {
            // A reused order already passed coupon checks when it was
            // first created; re-evaluating would reject its own redemption.
            (Some(code), false) => {
                use crate::services::coupons::CouponEvaluation;
                match self
                    .coupons
                    .evaluate(code, totals.total_mrp, customer_id)
                    .await?
                {
                    CouponEvaluation::Valid { discount, .. } => {
                        if discount != totals.discount {
                            return Err(ServiceError::ValidationError(
                                "Coupon discount does not match".to_string(),
                            ));
                        }
                        self.coupons.find_active(code).await?
                    }
                    CouponEvaluation::Invalid { message } => {
                        return Err(ServiceError::ValidationError(message));
                    }
                }
            }
            _ => None,
        };

        let order_id = match existing {
            Some(order) => {
                self.refresh_order_snapshot(&order, &snapshot).await?;
                info!(order_id = %order.id, "Reusing pending order");
                self.event_sender
                    .send_or_log(Event::OrderReused(order.id))
                    .await;
                order.id
            }
            None => {
                let id = self.insert_order(customer_id, &totals, &snapshot).await?;
                info!(order_id = %id, "Created order");
                self.event_sender.send_or_log(Event::OrderCreated(id)).await;
                id
            }
        };

        if self.redemption_policy == CouponRedemptionPolicy::OnOrder {
            if let Some(coupon) = coupon {
                self.coupons.redeem(coupon.id, customer_id, order_id).await?;
            }
        }

        Ok(CheckoutReceipt {
            order_id,
            reused,
            buyer: BuyerInfo {
                name: customer.name,
                email: customer.email,
                phone: customer.phone,
            },
        })
    }

    /// Mint a gateway payment intent for an unpaid order and remember the
    /// gateway's order id for later verification.
    #[instrument(skip(self))]
    pub async fn create_payment_intent(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
    ) -> Result<PaymentIntent, ServiceError> {
        let order = self.owned_order(order_id, customer_id).await?;

        if order.payment_stage == PaymentStage::Completed {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }
        if amount != order.total {
            return Err(ServiceError::ValidationError(
                "Amount does not match order total".to_string(),
            ));
        }

        let amount_minor = to_minor_units(amount)?;
        let intent = self
            .gateway
            .create_intent(amount_minor, &self.currency, &order_id.to_string())
            .await?;

        let mut active: order::ActiveModel = order.into();
        active.gateway_order_id = Set(Some(intent.gateway_order_id.clone()));
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id,
                gateway_order_id: intent.gateway_order_id.clone(),
            })
            .await;

        Ok(PaymentIntent {
            order_id,
            gateway_order_id: intent.gateway_order_id,
            amount_minor: intent.amount_minor,
            currency: intent.currency,
            key_id: self.gateway.key_id().to_string(),
        })
    }

    /// Settle an order from the gateway's payment proof.
    ///
    /// A bad signature marks the payment failed and leaves the order
    /// pending so the client can retry with a fresh payment. A good
    /// signature confirms the order and then runs the side effects: stock
    /// decrements, cart clearing, history append, and (under the deferred
    /// policy) coupon redemption. A decrement that finds the stock already
    /// gone flags the order for reconciliation instead of failing the
    /// settlement.
    #[instrument(skip(self, proof))]
    pub async fn verify_payment(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
        proof: PaymentProof,
    ) -> Result<order::Model, ServiceError> {
        let order = self.owned_order(order_id, customer_id).await?;

        // A settlement that already landed is final; re-running the side
        // effects would double-decrement stock.
        if order.payment_stage == PaymentStage::Completed {
            return Ok(order);
        }

        let genuine = self.gateway.verify_payment_signature(
            &proof.gateway_order_id,
            &proof.gateway_payment_id,
            &proof.signature,
        );

        if !genuine {
            warn!(%order_id, "Payment signature verification failed");
            let mut active: order::ActiveModel = order.into();
            active.payment_stage = Set(PaymentStage::Failed);
            active.fulfillment_stage = Set(FulfillmentStage::Pending);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;

            self.event_sender
                .send_or_log(Event::PaymentVerificationFailed(order_id))
                .await;

            return Err(ServiceError::PaymentFailed(
                "Invalid signature. Payment failed.".to_string(),
            ));
        }

        let coupon_code = order.coupon_code.clone();
        let mut active: order::ActiveModel = order.into();
        active.payment_stage = Set(PaymentStage::Completed);
        active.fulfillment_stage = Set(FulfillmentStage::Confirmed);
        active.gateway_order_id = Set(Some(proof.gateway_order_id.clone()));
        active.gateway_payment_id = Set(Some(proof.gateway_payment_id.clone()));
        active.updated_at = Set(Utc::now());
        let settled = active.update(&*self.db).await?;

        info!(%order_id, gateway_payment_id = %proof.gateway_payment_id, "Payment verified");

        let settled = self.run_settlement_side_effects(settled, customer_id).await?;

        if self.redemption_policy == CouponRedemptionPolicy::OnPayment {
            if let Some(code) = coupon_code {
                if let Some(coupon) = self.coupons.find_active(&code).await? {
                    self.coupons.redeem(coupon.id, customer_id, order_id).await?;
                }
            }
        }

        self.event_sender
            .send_or_log(Event::PaymentVerified(order_id))
            .await;

        Ok(settled)
    }

    /// Post-payment side effects. None of them may undo the settlement;
    /// failures downgrade to a reconciliation flag and a log line.
    async fn run_settlement_side_effects(
        &self,
        order: order::Model,
        customer_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order_id = order.id;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::VariantId)
            .all(&*self.db)
            .await?;

        let mut short_of_stock = false;
        for item in &items {
            let decremented = self
                .inventory
                .decrement_stock(item.variant_id, item.quantity)
                .await?;
            if decremented {
                self.event_sender
                    .send_or_log(Event::StockDecremented {
                        variant_id: item.variant_id,
                        quantity: item.quantity,
                    })
                    .await;
            } else {
                error!(
                    %order_id,
                    variant_id = %item.variant_id,
                    quantity = item.quantity,
                    "Paid order could not decrement stock; flagging for reconciliation"
                );
                short_of_stock = true;
                self.event_sender
                    .send_or_log(Event::StockDecrementFailed {
                        order_id,
                        variant_id: item.variant_id,
                        quantity: item.quantity,
                    })
                    .await;
            }
        }

        let order = if short_of_stock {
            let mut active: order::ActiveModel = order.into();
            active.needs_reconciliation = Set(true);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?
        } else {
            order
        };

        if let Some(cart) = self.carts.find_by_customer(customer_id).await? {
            self.carts.clear(cart.id).await?;
            self.event_sender
                .send_or_log(Event::CartCleared(cart.id))
                .await;
        }

        self.append_order_history(customer_id, order_id).await?;

        Ok(order)
    }

    /// Idempotent append backed by the unique (customer_id, order_id) index.
    async fn append_order_history(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let row = order_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        };

        let insert = order_history::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    order_history::Column::CustomerId,
                    order_history::Column::OrderId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&*self.db)
            .await;

        match insert {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn owned_order(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Freeze cart lines into order snapshots, verifying stock as of now.
    /// Shortages are reported per line so the client can fix the cart in
    /// one pass.
    async fn snapshot_cart(&self, cart_id: Uuid) -> Result<Vec<LineSnapshot>, ServiceError> {
        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(product_variant::Entity)
            .all(&*self.db)
            .await?;

        let mut snapshot = Vec::with_capacity(lines.len());
        let mut shortages: Vec<String> = Vec::new();

        for (line, variant) in lines {
            let variant = variant.ok_or_else(|| {
                ServiceError::InvalidOperation(
                    "Cart contains an item that is no longer sold".to_string(),
                )
            })?;
            let product = product::Entity::find_by_id(variant.product_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::InvalidOperation(
                        "Cart contains an item that is no longer sold".to_string(),
                    )
                })?;

            if variant.stock < line.quantity {
                shortages.push(format!(
                    "{} ({}, {}): requested {}, available {}",
                    product.name, variant.size, variant.colour, line.quantity, variant.stock
                ));
                continue;
            }

            snapshot.push(LineSnapshot {
                variant_id: variant.id,
                quantity: line.quantity,
                unit_price: variant.unit_price,
                product_name: product.name,
                size: variant.size,
                colour: variant.colour,
            });
        }

        if !shortages.is_empty() {
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient stock for {}",
                shortages.join("; ")
            )));
        }

        Ok(snapshot)
    }

    /// An unpaid pending order with identical totals is the same checkout
    /// being retried.
    async fn find_reusable_order(
        &self,
        customer_id: Uuid,
        totals: &OrderTotals,
    ) -> Result<Option<order::Model>, ServiceError> {
        let mut query = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::FulfillmentStage.eq(FulfillmentStage::Pending))
            .filter(order::Column::PaymentStage.eq(PaymentStage::Pending))
            .filter(order::Column::TotalMrp.eq(totals.total_mrp))
            .filter(order::Column::Discount.eq(totals.discount))
            .filter(order::Column::Total.eq(totals.total));

        query = match &totals.coupon_code {
            Some(code) => query.filter(order::Column::CouponCode.eq(code.clone())),
            None => query.filter(order::Column::CouponCode.is_null()),
        };

        Ok(query
            .order_by_desc(order::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }

    async fn insert_order(
        &self,
        customer_id: Uuid,
        totals: &OrderTotals,
        snapshot: &[LineSnapshot],
    ) -> Result<Uuid, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id),
            total_mrp: Set(totals.total_mrp),
            coupon_code: Set(totals.coupon_code.clone()),
            discount: Set(totals.discount),
            total: Set(totals.total),
            fulfillment_stage: Set(FulfillmentStage::Pending),
            payment_stage: Set(PaymentStage::Pending),
            gateway_order_id: Set(None),
            gateway_payment_id: Set(None),
            needs_reconciliation: Set(false),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        insert_snapshot(&txn, order_id, snapshot).await?;
        txn.commit().await?;

        Ok(order_id)
    }

    /// Replace a reused order's line snapshot with the cart as it stands
    /// now. Totals matched, but the mix of lines behind them may differ.
    async fn refresh_order_snapshot(
        &self,
        order: &order::Model,
        snapshot: &[LineSnapshot],
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await?;
        insert_snapshot(&txn, order.id, snapshot).await?;

        let mut active: order::ActiveModel = order.clone().into();
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }
}

async fn insert_snapshot(
    txn: &sea_orm::DatabaseTransaction,
    order_id: Uuid,
    snapshot: &[LineSnapshot],
) -> Result<(), ServiceError> {
    for line in snapshot {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            variant_id: Set(line.variant_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            product_name: Set(line.product_name.clone()),
            size: Set(line.size.clone()),
            colour: Set(line.colour.clone()),
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}

/// Convert a major-unit amount to the gateway's integer minor units.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError("Amount out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_scale_by_hundred() {
        assert_eq!(to_minor_units(dec!(499)).unwrap(), 49900);
        assert_eq!(to_minor_units(dec!(0)).unwrap(), 0);
        assert_eq!(to_minor_units(dec!(12.34)).unwrap(), 1234);
    }

    #[test]
    fn minor_units_reject_overflow() {
        assert!(to_minor_units(Decimal::MAX).is_err());
    }
}

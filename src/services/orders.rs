use crate::{
    db::DbPool,
    entities::{
        order::{self, FulfillmentStage, PaymentStage},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Order queries and the fulfillment state machine. Creation and payment
/// stamping live in the checkout service; this one covers everything that
/// happens to an order afterwards.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

/// An order with its frozen line snapshot, as returned to customers.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    pub id: Uuid,
    pub total_mrp: Decimal,
    pub coupon_code: Option<String>,
    pub discount: Decimal,
    pub total: Decimal,
    pub fulfillment_stage: FulfillmentStage,
    pub payment_stage: PaymentStage,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<order_item::Model>,
}

impl OrderWithItems {
    fn assemble(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            total_mrp: order.total_mrp,
            coupon_code: order.coupon_code,
            discount: order.discount,
            total: order.total,
            fulfillment_stage: order.fulfillment_stage,
            payment_stage: order.payment_stage,
            delivered_at: order.delivered_at,
            created_at: order.created_at,
            items,
        }
    }
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// The customer's orders, most recent first. Orders still pending
    /// fulfillment are unsettled checkouts and are not shown.
    #[instrument(skip(self))]
    pub async fn my_orders(&self, customer_id: Uuid) -> Result<Vec<OrderWithItems>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::FulfillmentStage.ne(FulfillmentStage::Pending))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut out = Vec::with_capacity(orders.len());
        for o in orders {
            let items = self.items_of(o.id).await?;
            out.push(OrderWithItems::assemble(o, items));
        }
        Ok(out)
    }

    /// A single order, visible only to its owner.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.owned_order(order_id, customer_id).await?;
        let items = self.items_of(order.id).await?;
        Ok(OrderWithItems::assemble(order, items))
    }

    pub async fn owned_order(
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

    pub async fn items_of(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Admin operation: advance (or cancel) the fulfillment stage. Illegal
    /// transitions are rejected; reaching Delivered stamps `delivered_at`,
    /// which anchors the return window.
    #[instrument(skip(self))]
    pub async fn set_fulfillment_stage(
        &self,
        order_id: Uuid,
        next: FulfillmentStage,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        let current = order.fulfillment_stage;
        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move order from {:?} to {:?}",
                current, next
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.fulfillment_stage = Set(next);
        if next == FulfillmentStage::Delivered {
            active.delivered_at = Set(Some(Utc::now()));
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(%order_id, ?current, ?next, "Order fulfillment stage changed");
        self.event_sender
            .send_or_log(Event::OrderStageChanged {
                order_id,
                old_stage: format!("{:?}", current),
                new_stage: format!("{:?}", next),
            })
            .await;

        Ok(updated)
    }
}

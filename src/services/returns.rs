use crate::{
    db::DbPool,
    entities::{
        order::{self, FulfillmentStage},
        order_item, return_item,
        return_request::{self, ReturnStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Post-delivery returns lifecycle.
#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    return_window_days: i64,
}

/// One requested return line: which variant and how many units.
#[derive(Debug, Clone)]
pub struct ReturnLine {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnWithItems {
    #[serde(flatten)]
    pub request: return_request::Model,
    pub items: Vec<return_item::Model>,
}

impl ReturnService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, return_window_days: i64) -> Self {
        Self {
            db,
            event_sender,
            return_window_days,
        }
    }

    /// Open a return for a delivered order.
    ///
    /// Eligibility: the order belongs to the caller, was delivered, is
    /// still inside the return window, has no prior return, and every
    /// requested line matches an order line with at most the purchased
    /// quantity.
    #[instrument(skip(self, lines))]
    pub async fn request_return(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        lines: Vec<ReturnLine>,
        reason: Option<String>,
    ) -> Result<ReturnWithItems, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "A return must include at least one item".to_string(),
            ));
        }

        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.fulfillment_stage != FulfillmentStage::Delivered {
            return Err(ServiceError::InvalidOperation(
                "Order has not been delivered".to_string(),
            ));
        }

        let delivered_at = order.delivered_at.ok_or_else(|| {
            ServiceError::InternalError("Delivered order missing delivery timestamp".to_string())
        })?;
        if Utc::now() - delivered_at > Duration::days(self.return_window_days) {
            return Err(ServiceError::InvalidOperation(format!(
                "Return window of {} days has expired",
                self.return_window_days
            )));
        }

        if self.exists_for_order(order_id).await? {
            return Err(ServiceError::Conflict(
                "A return already exists for this order".to_string(),
            ));
        }

        let purchased = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        for line in &lines {
            let bought = purchased
                .iter()
                .find(|p| p.variant_id == line.variant_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Requested item is not part of this order".to_string(),
                    )
                })?;
            if line.quantity <= 0 || line.quantity > bought.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Cannot return {} of an item ordered {} times",
                    line.quantity, bought.quantity
                )));
            }
        }

        let now = Utc::now();
        let request_id = Uuid::new_v4();
        let row = return_request::ActiveModel {
            id: Set(request_id),
            order_id: Set(order_id),
            customer_id: Set(customer_id),
            reason: Set(reason),
            status: Set(ReturnStatus::Requested),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let txn = self.db.begin().await?;

        // The unique index on order_id backstops the existence check above
        // when two requests race.
        let insert = return_request::Entity::insert(row)
            .on_conflict(
                OnConflict::column(return_request::Column::OrderId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&txn)
            .await;
        match insert {
            Ok(_) => {}
            Err(DbErr::RecordNotInserted) => {
                txn.rollback().await?;
                return Err(ServiceError::Conflict(
                    "A return already exists for this order".to_string(),
                ));
            }
            Err(e) => {
                txn.rollback().await?;
                return Err(e.into());
            }
        }

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let item = return_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_id: Set(request_id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;

        info!(%order_id, %request_id, "Return requested");
        self.event_sender
            .send_or_log(Event::ReturnRequested(request_id))
            .await;

        let request = return_request::Entity::find_by_id(request_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::InternalError("Return vanished after insert".into()))?;

        Ok(ReturnWithItems { request, items })
    }

    pub async fn exists_for_order(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        Ok(return_request::Entity::find()
            .filter(return_request::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?
            .is_some())
    }

    /// The caller's returns, most recent first.
    #[instrument(skip(self))]
    pub async fn my_returns(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<ReturnWithItems>, ServiceError> {
        let requests = return_request::Entity::find()
            .filter(return_request::Column::CustomerId.eq(customer_id))
            .order_by_desc(return_request::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            let items = return_item::Entity::find()
                .filter(return_item::Column::ReturnId.eq(request.id))
                .all(&*self.db)
                .await?;
            out.push(ReturnWithItems { request, items });
        }
        Ok(out)
    }

    /// Admin operation: move a return along its lifecycle. Skipping stages,
    /// moving backwards, or leaving a terminal state is rejected.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        return_id: Uuid,
        next: ReturnStatus,
    ) -> Result<return_request::Model, ServiceError> {
        let request = return_request::Entity::find_by_id(return_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Return not found".to_string()))?;

        let current = request.status;
        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move return from {:?} to {:?}",
                current, next
            )));
        }

        let mut active: return_request::ActiveModel = request.into();
        active.status = Set(next);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(%return_id, ?current, ?next, "Return status changed");
        self.event_sender
            .send_or_log(Event::ReturnStatusChanged {
                return_id,
                old_status: format!("{:?}", current),
                new_status: format!("{:?}", next),
            })
            .await;

        Ok(updated)
    }
}

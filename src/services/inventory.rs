use crate::{db::DbPool, entities::product_variant, errors::ServiceError};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Owns the stock column of product variants.
///
/// Decrements go through a single conditional UPDATE so stock can never be
/// driven below zero, no matter how many settlements race.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Decrement `quantity` units from a variant if, and only if, that much
    /// stock is still there. Returns `Ok(true)` when the decrement landed
    /// and `Ok(false)` when stock was insufficient at execution time.
    #[instrument(skip(self))]
    pub async fn decrement_stock(
        &self,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }

        let result = product_variant::Entity::update_many()
            .col_expr(
                product_variant::Column::Stock,
                Expr::col(product_variant::Column::Stock).sub(quantity),
            )
            .col_expr(
                product_variant::Column::UpdatedAt,
                Expr::value(Utc::now()),
            )
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::Stock.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 1 {
            info!(%variant_id, quantity, "Decremented stock");
            Ok(true)
        } else {
            warn!(%variant_id, quantity, "Stock decrement skipped: insufficient stock");
            Ok(false)
        }
    }

    /// Current stock of a variant.
    pub async fn available_stock(&self, variant_id: Uuid) -> Result<i32, ServiceError> {
        let variant = product_variant::Entity::find_by_id(variant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product variant not found".to_string()))?;
        Ok(variant.stock)
    }
}

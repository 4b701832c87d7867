use crate::{
    db::DbPool,
    entities::{cart, cart_item, product, product_variant},
    errors::ServiceError,
    services::catalog::CatalogService,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Shopping cart operations. Carts are created lazily on first touch and
/// keep at most one line per variant.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    catalog: Arc<CatalogService>,
}

/// A cart line joined with live catalog data for display.
#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    pub variant_id: Uuid,
    pub product_name: String,
    pub size: String,
    pub colour: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub in_stock: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartLineView>,
    pub subtotal: Decimal,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, catalog: Arc<CatalogService>) -> Self {
        Self { db, catalog }
    }

    /// Find the customer's cart, creating an empty one if none exists yet.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = self.find_by_customer(customer_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let new_cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match new_cart.insert(&*self.db).await {
            Ok(model) => Ok(model),
            // Lost a creation race; the winner's cart is the one to use.
            Err(_) => self
                .find_by_customer(customer_id)
                .await?
                .ok_or_else(|| ServiceError::InternalError("Cart creation failed".to_string())),
        }
    }

    pub async fn find_by_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?)
    }

    pub async fn items(&self, cart_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// The customer's cart with lines joined against the live catalog.
    /// Lines whose variant has since been deleted are skipped.
    #[instrument(skip(self))]
    pub async fn view(&self, customer_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(customer_id).await?;

        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(product_variant::Entity)
            .all(&*self.db)
            .await?;

        let mut items = Vec::with_capacity(lines.len());
        let mut subtotal = Decimal::ZERO;

        for (line, variant) in lines {
            let Some(variant) = variant else { continue };
            let product = product::Entity::find_by_id(variant.product_id)
                .one(&*self.db)
                .await?;
            let product_name = product.map(|p| p.name).unwrap_or_default();

            subtotal += variant.unit_price * Decimal::from(line.quantity);
            items.push(CartLineView {
                variant_id: variant.id,
                product_name,
                size: variant.size,
                colour: variant.colour,
                unit_price: variant.unit_price,
                quantity: line.quantity,
                in_stock: variant.stock,
            });
        }

        Ok(CartView {
            cart_id: cart.id,
            items,
            subtotal,
        })
    }

    /// Add `quantity` of a variant to the cart, merging into an existing
    /// line for the same variant. The merged quantity is checked against
    /// current stock as an advisory limit; the authoritative check happens
    /// again at settlement.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }

        let detail = self
            .catalog
            .find_variant(variant_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product variant not found".to_string()))?;

        let cart = self.get_or_create(customer_id).await?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db)
            .await?;

        let merged = existing.as_ref().map_or(0, |l| l.quantity) + quantity;
        if merged > detail.variant.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} left in stock for {}",
                detail.variant.stock, detail.product.name
            )));
        }

        match existing {
            Some(line) => {
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(merged);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?;
            }
            None => {
                let now = Utc::now();
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    variant_id: Set(variant_id),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        info!(%customer_id, %variant_id, quantity, "Added cart line");
        self.view(customer_id).await
    }

    /// Set a line to an exact quantity; zero removes the line.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        customer_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must not be negative".to_string(),
            ));
        }
        if quantity == 0 {
            return self.remove_item(customer_id, variant_id).await;
        }

        let detail = self
            .catalog
            .find_variant(variant_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product variant not found".to_string()))?;

        if quantity > detail.variant.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} left in stock for {}",
                detail.variant.stock, detail.product.name
            )));
        }

        let cart = self.get_or_create(customer_id).await?;
        let line = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Item not in cart".to_string()))?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.view(customer_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        variant_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(customer_id).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .exec(&*self.db)
            .await?;

        self.view(customer_id).await
    }

    /// Drop every line of the cart. Used after successful settlement.
    #[instrument(skip(self))]
    pub async fn clear(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

use crate::{
    db::DbPool,
    entities::{product, product_variant},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read side of the catalog consumed by cart and settlement flows.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

/// A variant joined with its parent product, as the settlement engine
/// needs it for line snapshots.
#[derive(Debug, Clone)]
pub struct VariantDetail {
    pub variant: product_variant::Model,
    pub product: product::Model,
}

/// Customer-facing projection of one colour of a product.
#[derive(Debug, Clone, Serialize)]
pub struct ColourGroup {
    pub colour: String,
    pub images: Vec<String>,
    pub options: Vec<VariantOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantOption {
    pub variant_id: Uuid,
    pub size: String,
    pub unit_price: Decimal,
    pub stock: i32,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_variant(
        &self,
        variant_id: Uuid,
    ) -> Result<Option<VariantDetail>, ServiceError> {
        let found = product_variant::Entity::find_by_id(variant_id)
            .find_also_related(product::Entity)
            .one(&*self.db)
            .await?;

        Ok(found.and_then(|(variant, product)| {
            product.map(|product| VariantDetail { variant, product })
        }))
    }

    /// Variants of a product grouped by colour for presentation.
    #[instrument(skip(self))]
    pub async fn variants_by_colour(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<ColourGroup>, ServiceError> {
        let variants = product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.eq(product_id))
            .order_by_asc(product_variant::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(group_by_colour(variants))
    }
}

/// Stateless grouping: rows sharing a colour collapse into one group with
/// that colour's image list and per-size options. Group order follows
/// first appearance.
pub fn group_by_colour(variants: Vec<product_variant::Model>) -> Vec<ColourGroup> {
    let mut groups: Vec<ColourGroup> = Vec::new();

    for variant in variants {
        let option = VariantOption {
            variant_id: variant.id,
            size: variant.size.clone(),
            unit_price: variant.unit_price,
            stock: variant.stock,
        };

        match groups.iter_mut().find(|g| g.colour == variant.colour) {
            Some(group) => group.options.push(option),
            None => {
                let images = variant
                    .images
                    .as_ref()
                    .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
                    .unwrap_or_default();
                groups.push(ColourGroup {
                    colour: variant.colour.clone(),
                    images,
                    options: vec![option],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn variant(colour: &str, size: &str, stock: i32) -> product_variant::Model {
        product_variant::Model {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            size: size.to_string(),
            colour: colour.to_string(),
            unit_price: dec!(499),
            stock,
            images: Some(serde_json::json!(["a.jpg", "b.jpg"])),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn groups_sizes_under_one_colour() {
        let groups = group_by_colour(vec![
            variant("Red", "S", 3),
            variant("Red", "M", 1),
            variant("Blue", "S", 2),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].colour, "Red");
        assert_eq!(groups[0].options.len(), 2);
        assert_eq!(groups[0].images, vec!["a.jpg", "b.jpg"]);
        assert_eq!(groups[1].colour, "Blue");
        assert_eq!(groups[1].options.len(), 1);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_colour(vec![]).is_empty());
    }
}

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Return request. The unique index on `order_id` enforces one return per
/// order at the store level.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "returns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_id: Uuid,
    pub customer_id: Uuid,
    #[sea_orm(nullable)]
    pub reason: Option<String>,
    pub status: ReturnStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::return_item::Entity")]
    ReturnItems,
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::return_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    #[sea_orm(string_value = "requested")]
    Requested,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "picked_up")]
    PickedUp,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl ReturnStatus {
    /// Allowed moves: Requested → Approved | Rejected, Approved → PickedUp,
    /// PickedUp → Completed. Everything else is rejected, including
    /// backward or stage-skipping requests.
    pub fn can_transition_to(self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, next),
            (Requested, Approved)
                | (Requested, Rejected)
                | (Approved, PickedUp)
                | (PickedUp, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReturnStatus::Rejected | ReturnStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::ReturnStatus::*;

    #[test]
    fn only_forward_transitions_are_allowed() {
        assert!(Requested.can_transition_to(Approved));
        assert!(Requested.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(PickedUp));
        assert!(PickedUp.can_transition_to(Completed));

        assert!(!Requested.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Requested));
    }

    #[test]
    fn rejected_and_completed_are_terminal() {
        assert!(Rejected.is_terminal());
        assert!(Completed.is_terminal());
        assert!(!Requested.is_terminal());
        assert!(!Approved.is_terminal());
        assert!(!PickedUp.is_terminal());
    }
}

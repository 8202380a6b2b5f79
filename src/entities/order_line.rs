use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable snapshot of an order line taken the first time the order is seen.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_lines")]
pub struct Model {
    /// Order item id reported by the order subsystem.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity_ordered: i32,
    pub unit_price_minor: i64,
    pub currency: String,
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::return_unit::Entity")]
    ReturnUnits,
}

impl Related<super::return_unit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnUnits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

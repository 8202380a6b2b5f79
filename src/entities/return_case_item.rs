use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "return_case_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub return_case_id: Uuid,
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity_returned: i32,
    /// Unit price copied from the order line snapshot.
    pub unit_price_minor: i64,
    pub batch_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::return_case::Entity",
        from = "Column::ReturnCaseId",
        to = "super::return_case::Column::Id"
    )]
    ReturnCase,
}

impl Related<super::return_case::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnCase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

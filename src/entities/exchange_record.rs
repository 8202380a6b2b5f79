use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Link between a refunded return case and its replacement order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "exchange_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub return_case_id: Uuid,
    pub new_order_id: Uuid,
    pub new_order_number: String,
    pub currency: String,
    pub refund_amount_minor: i64,
    pub new_order_total_minor: i64,
    /// `refund_amount - new_order_total`; positive is owed to the customer.
    pub net_amount_minor: i64,
    pub credit_applied_minor: i64,
    pub credit_refund_id: Uuid,
    pub payout_refund_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
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

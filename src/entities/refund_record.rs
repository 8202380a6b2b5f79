use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::RefundStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "refund_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub return_case_id: Uuid,
    /// Storage form of [`crate::models::RefundMethod`].
    pub method: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: RefundStatus,
    pub transaction_reference: Option<String>,
    /// Cash denomination breakdown, `[{"face_value": "100.00", "count": 2}]`.
    pub denominations: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ReturnStatus, ReturnType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "return_cases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub return_number: String,
    pub order_id: Uuid,
    pub order_number: String,
    pub status: ReturnStatus,
    pub return_type: ReturnType,
    pub reason: String,
    pub currency: String,
    pub total_return_value_minor: i64,
    pub total_refund_amount_minor: Option<i64>,
    pub processing_fee_minor: Option<i64>,
    pub quality_check_passed: Option<bool>,
    pub quality_check_notes: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub degraded_barcodes: bool,
    /// JSON array of warning strings raised while restoring stock.
    pub inventory_warnings: Json,
    pub inventory_restored_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub quality_checked_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn warnings(&self) -> Vec<String> {
        serde_json::from_value(self.inventory_warnings.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::return_case_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::refund_record::Entity")]
    RefundRecords,
    #[sea_orm(has_one = "super::exchange_record::Entity")]
    ExchangeRecord,
}

impl Related<super::return_case_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::refund_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefundRecords.def()
    }
}

impl Related<super::exchange_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExchangeRecord.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}

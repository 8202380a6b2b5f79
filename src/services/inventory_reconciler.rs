use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    entities::{inventory_batch, return_case, return_case_item},
    errors::ServiceError,
};

/// What a restore pass did for one return case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RestoreOutcome {
    /// `false` when the case had already been restored and nothing ran.
    pub performed: bool,
    pub units_restored: i64,
    pub warnings: Vec<String>,
}

/// Credits returned quantities back to their originating stock batch.
///
/// Missing batches never fail the caller; they come back as warnings that the
/// caller stores on the case.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryReconciler;

impl InventoryReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Runs inside the caller's transaction. The caller is responsible for
    /// stamping `inventory_restored_at` when `performed` is true.
    #[instrument(skip(self, db, case), fields(return_id = %case.id))]
    pub async fn restore<C: ConnectionTrait>(
        &self,
        db: &C,
        case: &return_case::Model,
    ) -> Result<RestoreOutcome, ServiceError> {
        if case.inventory_restored_at.is_some() {
            info!("Inventory already restored for return case");
            return Ok(RestoreOutcome::default());
        }

        let items = return_case_item::Entity::find()
            .filter(return_case_item::Column::ReturnCaseId.eq(case.id))
            .all(db)
            .await?;

        let mut outcome = RestoreOutcome {
            performed: true,
            ..Default::default()
        };

        for item in items {
            let Some(batch_id) = item.batch_id else {
                outcome.warnings.push(format!(
                    "{} ({}): no originating batch, stock not restored",
                    item.product_name, item.order_item_id
                ));
                continue;
            };

            let updated = inventory_batch::Entity::update_many()
                .col_expr(
                    inventory_batch::Column::QuantityAvailable,
                    Expr::col(inventory_batch::Column::QuantityAvailable)
                        .add(item.quantity_returned),
                )
                .col_expr(inventory_batch::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(inventory_batch::Column::Id.eq(batch_id))
                .exec(db)
                .await?;

            if updated.rows_affected == 0 {
                outcome.warnings.push(format!(
                    "{} ({}): batch {} not found, stock not restored",
                    item.product_name, item.order_item_id, batch_id
                ));
                continue;
            }
            outcome.units_restored += i64::from(item.quantity_returned);
        }

        metrics::counter!(
            "returns_engine_units_restocked_total",
            outcome.units_restored.max(0) as u64
        );
        if outcome.warnings.is_empty() {
            info!(units = outcome.units_restored, "Inventory restored");
        } else {
            warn!(
                units = outcome.units_restored,
                warnings = ?outcome.warnings,
                "Inventory restored with warnings"
            );
        }
        Ok(outcome)
    }
}

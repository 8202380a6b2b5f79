use crate::{
    commands::{record_transition, transition, update_case, Command, CommandContext},
    entities::return_case,
    errors::ServiceError,
    events::Event,
    models::ReturnAction,
    services::inventory_reconciler::RestoreOutcome,
};
use chrono::Utc;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReturnCommand {
    pub return_id: Uuid,
    pub restore_inventory: bool,
}

#[async_trait::async_trait]
impl Command for ProcessReturnCommand {
    type Result = return_case::Model;

    #[instrument(skip(self, ctx), fields(return_id = %self.return_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let (scope, case) = ctx.lock_case(self.return_id).await?;
        let next = transition(&case, ReturnAction::Process)?;

        let restored = if self.restore_inventory {
            Some(ctx.reconciler.restore(&scope.txn, &case).await?)
        } else {
            None
        };

        let mut changes = return_case::ActiveModel {
            status: Set(next),
            processed_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        if let Some(outcome) = restored.as_ref().filter(|o| o.performed) {
            apply_restore(&case, outcome, &mut changes);
        }
        let updated = update_case(&scope.txn, &case, changes).await?;
        scope.commit().await?;

        record_transition(case.status, updated.status);
        info!(restore_inventory = self.restore_inventory, "Return processed");
        ctx.event_sender
            .publish(Event::ReturnProcessed {
                return_id: updated.id,
                inventory_restored: updated.inventory_restored_at.is_some(),
            })
            .await;
        if let Some(outcome) = restored.filter(|o| o.performed) {
            publish_restore(ctx, &updated, outcome).await;
        }
        Ok(updated)
    }
}

/// Stamps the restore marker and appends the pass's warnings to the case.
pub(crate) fn apply_restore(
    case: &return_case::Model,
    outcome: &RestoreOutcome,
    changes: &mut return_case::ActiveModel,
) {
    let mut warnings = case.warnings();
    warnings.extend(outcome.warnings.iter().cloned());
    changes.inventory_restored_at = Set(Some(Utc::now()));
    changes.inventory_warnings = Set(serde_json::json!(warnings));
}

pub(crate) async fn publish_restore(
    ctx: &CommandContext,
    case: &return_case::Model,
    outcome: RestoreOutcome,
) {
    ctx.event_sender
        .publish(Event::InventoryRestored {
            return_id: case.id,
            units_restored: outcome.units_restored,
            warnings: outcome.warnings,
        })
        .await;
}

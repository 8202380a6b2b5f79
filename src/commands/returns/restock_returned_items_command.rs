use crate::{
    commands::{
        returns::process_return_command::{apply_restore, publish_restore},
        transition, update_case, Command, CommandContext,
    },
    entities::return_case,
    errors::ServiceError,
    models::ReturnAction,
    services::inventory_reconciler::RestoreOutcome,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

/// Restores stock for a case processed without restocking. No-op when the
/// case was already restored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockReturnedItemsCommand {
    pub return_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RestockReturnedItemsResult {
    pub case: return_case::Model,
    pub outcome: RestoreOutcome,
}

#[async_trait::async_trait]
impl Command for RestockReturnedItemsCommand {
    type Result = RestockReturnedItemsResult;

    #[instrument(skip(self, ctx), fields(return_id = %self.return_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let (scope, case) = ctx.lock_case(self.return_id).await?;
        transition(&case, ReturnAction::RestoreInventory)?;

        let outcome = ctx.reconciler.restore(&scope.txn, &case).await?;
        if !outcome.performed {
            info!("Restock skipped, inventory already restored");
            return Ok(RestockReturnedItemsResult { case, outcome });
        }

        let mut changes = return_case::ActiveModel::default();
        apply_restore(&case, &outcome, &mut changes);
        let updated = update_case(&scope.txn, &case, changes).await?;
        scope.commit().await?;

        info!(units = outcome.units_restored, "Returned items restocked");
        publish_restore(ctx, &updated, outcome.clone()).await;
        Ok(RestockReturnedItemsResult {
            case: updated,
            outcome,
        })
    }
}

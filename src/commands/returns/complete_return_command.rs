use crate::{
    commands::{record_transition, transition, update_case, Command, CommandContext},
    entities::return_case,
    errors::ServiceError,
    events::Event,
    models::ReturnAction,
};
use chrono::Utc;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

/// Final gate before any refund can be allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteReturnCommand {
    pub return_id: Uuid,
}

#[async_trait::async_trait]
impl Command for CompleteReturnCommand {
    type Result = return_case::Model;

    #[instrument(skip(self, ctx), fields(return_id = %self.return_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let (scope, case) = ctx.lock_case(self.return_id).await?;
        let next = transition(&case, ReturnAction::Complete)?;

        let changes = return_case::ActiveModel {
            status: Set(next),
            completed_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let updated = update_case(&scope.txn, &case, changes).await?;
        scope.commit().await?;

        record_transition(case.status, updated.status);
        info!("Return completed");
        ctx.event_sender
            .publish(Event::ReturnCompleted {
                return_id: updated.id,
            })
            .await;
        Ok(updated)
    }
}

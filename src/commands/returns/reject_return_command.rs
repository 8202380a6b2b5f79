use crate::{
    commands::{
        record_transition, returns::validate_not_blank, transition, update_case, Command,
        CommandContext,
    },
    entities::return_case,
    errors::ServiceError,
    events::Event,
    models::ReturnAction,
};
use chrono::Utc;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Terminal exit for a case that is pending or approved. Consumed units stay
/// marked returned.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RejectReturnCommand {
    pub return_id: Uuid,
    #[validate(custom = "validate_not_blank")]
    pub reason: String,
}

#[async_trait::async_trait]
impl Command for RejectReturnCommand {
    type Result = return_case::Model;

    #[instrument(skip(self, ctx), fields(return_id = %self.return_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            let msg = format!("Invalid input: rejection reason {}", e);
            error!("{}", msg);
            ServiceError::ValidationError(msg)
        })?;

        let (scope, case) = ctx.lock_case(self.return_id).await?;
        let next = transition(&case, ReturnAction::Reject)?;

        let changes = return_case::ActiveModel {
            status: Set(next),
            rejection_reason: Set(Some(self.reason.trim().to_string())),
            rejected_at: Set(Some(Utc::now())),
            ..Default::default()
        };
        let updated = update_case(&scope.txn, &case, changes).await?;
        scope.commit().await?;

        record_transition(case.status, updated.status);
        info!(from = %case.status, "Return rejected");
        ctx.event_sender
            .publish(Event::ReturnRejected {
                return_id: updated.id,
                reason: self.reason.trim().to_string(),
            })
            .await;
        Ok(updated)
    }
}

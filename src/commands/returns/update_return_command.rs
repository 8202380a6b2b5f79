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
use validator::Validate;

/// Records a quality check and/or free-form notes.
///
/// The quality result may only be written while the case is pending; notes
/// can be updated in any state.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateReturnCommand {
    pub return_id: Uuid,
    pub quality_check_passed: Option<bool>,
    #[validate(length(max = 2000))]
    pub quality_check_notes: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[async_trait::async_trait]
impl Command for UpdateReturnCommand {
    type Result = return_case::Model;

    #[instrument(skip(self, ctx), fields(return_id = %self.return_id))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        if self.quality_check_passed.is_none()
            && self.quality_check_notes.is_none()
            && self.notes.is_none()
        {
            return Err(ServiceError::ValidationError(
                "nothing to update: provide quality_check_passed, quality_check_notes or notes"
                    .to_string(),
            ));
        }

        let (scope, case) = ctx.lock_case(self.return_id).await?;

        let mut changes = return_case::ActiveModel::default();
        let quality_recorded = self.quality_check_passed.is_some()
            || self.quality_check_notes.is_some();
        if quality_recorded {
            transition(&case, ReturnAction::RecordQualityCheck)?;
            if let Some(passed) = self.quality_check_passed {
                changes.quality_check_passed = Set(Some(passed));
                changes.quality_checked_at = Set(Some(Utc::now()));
            }
            if let Some(notes) = &self.quality_check_notes {
                changes.quality_check_notes = Set(Some(notes.clone()));
            }
        }
        if let Some(notes) = &self.notes {
            changes.notes = Set(Some(notes.clone()));
        }

        let updated = update_case(&scope.txn, &case, changes).await?;
        scope.commit().await?;

        if let Some(passed) = self.quality_check_passed {
            record_transition(case.status, updated.status);
            info!(passed, "Quality check recorded");
            ctx.event_sender
                .publish(Event::ReturnQualityChecked {
                    return_id: updated.id,
                    passed,
                })
                .await;
        }
        Ok(updated)
    }
}
